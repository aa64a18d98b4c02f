//! Host table file.
//!
//! The proxy reads its routable hosts, MOTD and advertised capacity from a
//! JSON file at startup and again on every reload:
//!
//! ```json
//! {
//!   "motd": "Minecraft VirtualHost Proxy",
//!   "capacity": 10,
//!   "hosts": {
//!     "lobby.example.net": { "address": "10.0.0.2", "port": 25566, "aliases": ["lobby"] }
//!   }
//! }
//! ```
//!
//! A reload that fails to read or parse keeps the previous table in place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::proxy::{
    HostEntry, HostTable, Router, ServerStatus, SharedStatus, DEFAULT_BACKEND_ADDRESS,
    DEFAULT_BACKEND_PORT, DEFAULT_CAPACITY, DEFAULT_MOTD,
};

/// On-disk host file format.
#[derive(Debug, Deserialize)]
pub struct HostsDocument {
    /// Message of the day shown in the server list.
    #[serde(default = "default_motd")]
    pub motd: String,
    /// Advertised player capacity.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Hosts by routing name.
    #[serde(default)]
    pub hosts: BTreeMap<String, HostDefinition>,
}

/// One host as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct HostDefinition {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_motd() -> String {
    DEFAULT_MOTD.to_string()
}

fn default_capacity() -> u32 {
    DEFAULT_CAPACITY
}

fn default_address() -> String {
    DEFAULT_BACKEND_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_BACKEND_PORT
}

/// Everything a host file yields.
#[derive(Debug)]
pub struct ProxySettings {
    pub table: HostTable,
    pub status: ServerStatus,
}

impl HostsDocument {
    /// Parse a host file's contents.
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse host file")
    }

    /// Build the routing table and status from this document.
    pub fn into_settings(self) -> ProxySettings {
        let entries = self
            .hosts
            .into_iter()
            .map(|(name, def)| HostEntry {
                name,
                address: def.address,
                port: def.port,
                aliases: def.aliases,
            })
            .collect();

        ProxySettings {
            table: HostTable::from_entries(entries),
            status: ServerStatus::new(self.motd, self.capacity),
        }
    }
}

/// Host file loader.
pub struct HostsFile {
    /// Path to the host file.
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and parse the host file.
    pub fn load(&self) -> Result<ProxySettings> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read host file: {}", self.path.display()))?;

        let document = HostsDocument::parse(&content)
            .with_context(|| format!("Invalid host file: {}", self.path.display()))?;
        let settings = document.into_settings();

        info!(
            path = %self.path.display(),
            host_count = settings.table.len(),
            capacity = settings.status.capacity,
            "Loaded host file"
        );

        Ok(settings)
    }

    /// Reload the host file into a running proxy.
    ///
    /// Both the host table and the server status are swapped atomically.
    /// On failure nothing changes and the error is returned.
    pub fn reload(&self, router: &Router, status: &SharedStatus) -> Result<()> {
        let settings = self.load()?;
        router.update(settings.table);
        status.store(Arc::new(settings.status));
        Ok(())
    }
}
