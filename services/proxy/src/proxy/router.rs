//! Host table and handshake routing.
//!
//! The routing key is the server address a client typed, taken from the
//! handshake string `<username>;<host>:<port>`.
//!
//! - Exact name match only (primary name or alias)
//! - The port in the handshake is informational; the backend port comes
//!   from the table
//! - No default backend
//! - Table reloads are applied atomically and never disturb connections
//!   that are mid-handshake

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

/// Backend address used when an entry does not name one.
pub const DEFAULT_BACKEND_ADDRESS: &str = "localhost";

/// Backend port used when an entry does not name one.
pub const DEFAULT_BACKEND_PORT: u16 = 25565;

/// One routable backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// Routing key.
    pub name: String,
    /// Backend hostname or IP.
    pub address: String,
    /// Backend port.
    pub port: u16,
    /// Extra names resolving to this entry.
    pub aliases: Vec<String>,
}

impl HostEntry {
    /// Create an entry pointing at `localhost:25565`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: DEFAULT_BACKEND_ADDRESS.to_string(),
            port: DEFAULT_BACKEND_PORT,
            aliases: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Where connections for this entry go.
    pub fn target(&self) -> BackendTarget {
        BackendTarget {
            host: self.address.clone(),
            port: self.port,
        }
    }
}

/// Resolved backend `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
}

impl BackendTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Immutable name → entry map. Aliases share the entry of their primary.
#[derive(Debug, Default)]
pub struct HostTable {
    by_name: HashMap<String, Arc<HostEntry>>,
    entry_count: usize,
}

impl HostTable {
    /// Build a table from entries.
    ///
    /// Primary names are inserted first. An alias that collides with any
    /// name already present is skipped, so aliases never shadow a primary.
    pub fn from_entries(entries: Vec<HostEntry>) -> Self {
        let mut by_name: HashMap<String, Arc<HostEntry>> = HashMap::new();
        let entries: Vec<Arc<HostEntry>> = entries.into_iter().map(Arc::new).collect();

        for entry in &entries {
            if by_name.insert(entry.name.clone(), Arc::clone(entry)).is_some() {
                warn!(name = %entry.name, "Duplicate host entry, last definition wins");
            }
        }
        let entry_count = by_name.len();

        for entry in &entries {
            for alias in &entry.aliases {
                match by_name.get(alias) {
                    Some(existing) if existing.name != entry.name => {
                        warn!(
                            alias = %alias,
                            host = %entry.name,
                            existing = %existing.name,
                            "Alias collides with an existing name, skipped"
                        );
                    }
                    Some(_) => {}
                    None => {
                        by_name.insert(alias.clone(), Arc::clone(entry));
                    }
                }
            }
        }

        Self {
            by_name,
            entry_count,
        }
    }

    /// Look up a primary name or alias.
    pub fn get(&self, name: &str) -> Option<&HostEntry> {
        self.by_name.get(name).map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of distinct entries (aliases not counted).
    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}

/// Split a handshake string into `(field, name, port)`.
///
/// Accepts exactly `^([^;]+);([^;]+):(\d{1,5})$`.
pub fn parse_routing_string(routing: &str) -> Option<(&str, &str, &str)> {
    let (field, rest) = routing.split_once(';')?;
    if field.is_empty() || rest.contains(';') {
        return None;
    }

    let (name, port) = rest.rsplit_once(':')?;
    let port_ok = (1..=5).contains(&port.len()) && port.bytes().all(|b| b.is_ascii_digit());
    if name.is_empty() || !port_ok {
        return None;
    }

    Some((field, name, port))
}

/// Resolves handshake strings against the current host table.
///
/// The table is held behind an `ArcSwap`: lookups take a consistent
/// snapshot without locking and reloads replace it in one pointer swap.
pub struct Router {
    table: ArcSwap<HostTable>,
}

impl Router {
    pub fn new(table: HostTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Replace the host table atomically.
    pub fn update(&self, table: HostTable) {
        let host_count = table.len();
        self.table.store(Arc::new(table));
        info!(host_count = host_count, "Host table updated atomically");
    }

    /// Current table snapshot.
    pub fn snapshot(&self) -> Arc<HostTable> {
        self.table.load_full()
    }

    pub fn host_count(&self) -> usize {
        self.table.load().len()
    }

    /// Extract the target name from a handshake string, if it is routable.
    ///
    /// Malformed strings and unknown names both yield `None`.
    pub fn find_host(&self, routing: &str) -> Option<String> {
        let (_, name, _) = parse_routing_string(routing)?;
        self.table.load().contains(name).then(|| name.to_string())
    }

    /// Resolve a handshake string to a backend.
    pub fn route(&self, routing: &str) -> Option<BackendTarget> {
        let table = self.table.load();
        let target = parse_routing_string(routing)
            .and_then(|(_, name, _)| table.get(name))
            .map(HostEntry::target);

        match &target {
            Some(target) => debug!(routing = %routing, backend = %target, "Handshake routed"),
            None => debug!(routing = %routing, "No host for handshake"),
        }
        target
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(HostTable::default())
    }
}

/// Shared router reference.
pub type SharedRouter = Arc<Router>;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table() -> HostTable {
        HostTable::from_entries(vec![
            HostEntry::new("lobby.example.net")
                .with_address("10.0.0.2")
                .with_port(25566)
                .with_alias("lobby"),
            HostEntry::new("survival.example.net").with_port(25567),
            HostEntry::new("creative.example.net").with_alias("survival.example.net"),
        ])
    }

    #[test]
    fn test_parse_routing_string() {
        assert_eq!(
            parse_routing_string("Notch;mc.example.net:25565"),
            Some(("Notch", "mc.example.net", "25565"))
        );
        // The host part may itself contain colons; the last one splits.
        assert_eq!(
            parse_routing_string("Notch;::1:25565"),
            Some(("Notch", "::1", "25565"))
        );
    }

    #[test]
    fn test_parse_routing_string_rejects_malformed() {
        for bad in [
            "",
            "Notch",
            "Notch;mc.example.net",
            ";mc.example.net:25565",
            "Notch;:25565",
            "Notch;mc.example.net:",
            "Notch;mc.example.net:123456",
            "Notch;mc.example.net:25a65",
            "Notch;mc;example.net:25565",
            "Notch;mc.example.net:25565 ",
        ] {
            assert_eq!(parse_routing_string(bad), None, "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_entry_defaults() {
        let entry = HostEntry::new("a");
        assert_eq!(entry.address, "localhost");
        assert_eq!(entry.port, 25565);
        assert!(entry.aliases.is_empty());
    }

    #[test]
    fn test_table_aliases() {
        let table = make_table();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get("lobby").unwrap().name, "lobby.example.net");
        // Alias must not shadow a primary.
        assert_eq!(
            table.get("survival.example.net").unwrap().name,
            "survival.example.net"
        );
    }

    #[test]
    fn test_route_known_host() {
        let router = Router::new(make_table());

        assert_eq!(
            router.route("Notch;lobby.example.net:25565"),
            Some(BackendTarget::new("10.0.0.2", 25566))
        );
        // The client-declared port is ignored.
        assert_eq!(
            router.route("Notch;lobby:1"),
            Some(BackendTarget::new("10.0.0.2", 25566))
        );
        assert_eq!(
            router.route("jeb_;survival.example.net:25565"),
            Some(BackendTarget::new("localhost", 25567))
        );
    }

    #[test]
    fn test_route_unknown_or_malformed() {
        let router = Router::new(make_table());

        assert_eq!(router.route("Notch;unknown.example.net:25565"), None);
        assert_eq!(router.route("lobby.example.net"), None);
        assert_eq!(router.route("Notch;LOBBY:25565"), None);
        assert_eq!(router.find_host("Notch;unknown:25565"), None);
    }

    #[test]
    fn test_find_host_returns_routing_name() {
        let router = Router::new(make_table());
        assert_eq!(router.find_host("Notch;lobby:25565").as_deref(), Some("lobby"));
    }

    #[test]
    fn test_update_swaps_table() {
        let router = Router::new(make_table());
        let before = router.snapshot();

        router.update(HostTable::from_entries(vec![HostEntry::new("new.example.net")]));

        assert_eq!(router.route("Notch;lobby:25565"), None);
        assert_eq!(
            router.route("Notch;new.example.net:25565"),
            Some(BackendTarget::new("localhost", 25565))
        );
        // Snapshots taken before the swap stay intact.
        assert!(before.contains("lobby"));
        assert_eq!(router.host_count(), 1);
    }

    #[test]
    fn test_backend_target_display() {
        assert_eq!(BackendTarget::new("localhost", 25565).to_string(), "localhost:25565");
        assert_eq!(BackendTarget::new("::1", 25565).to_string(), "[::1]:25565");
    }
}
