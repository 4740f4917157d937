//! Typed persistent key/value configuration.
//!
//! Models the device's namespaced flash store: every entry has a concrete
//! integer width, string or blob type, and the dump/show commands render one
//! `key[type]=value` line per entry. The flash driver itself is an external
//! collaborator behind [`ConfigBackend`]; the in-memory backend is what the
//! host build and the tests run on.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Namespace used by the core's own keys.
pub const CONFIG_NAMESPACE: &str = "config";

/// Hostname key.
pub const KEY_HOSTNAME: &str = "hostname";
/// Hostname description key.
pub const KEY_HOSTNAME_DESC: &str = "hostname_desc";
/// Wireless client SSID key.
pub const KEY_WLAN_SSID: &str = "wlan-ssid";
/// Wireless client passphrase key.
pub const KEY_WLAN_PASSWD: &str = "wlan-passwd";

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Unsigned 8-bit.
    U8(u8),
    /// Signed 8-bit.
    I8(i8),
    /// Unsigned 16-bit.
    U16(u16),
    /// Signed 16-bit.
    I16(i16),
    /// Unsigned 32-bit.
    U32(u32),
    /// Signed 32-bit.
    I32(i32),
    /// Unsigned 64-bit.
    U64(u64),
    /// Signed 64-bit.
    I64(i64),
    /// UTF-8 string.
    Str(String),
    /// Opaque binary blob.
    Blob(Vec<u8>),
}

impl ConfigValue {
    /// Type tag rendered in `key[type]=value` lines.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::U8(_) => "uint8",
            Self::I8(_) => "int8",
            Self::U16(_) => "uint16",
            Self::I16(_) => "int16",
            Self::U32(_) => "uint32",
            Self::I32(_) => "int32",
            Self::U64(_) => "uint64",
            Self::I64(_) => "int64",
            Self::Str(_) => "string",
            Self::Blob(_) => "blob",
        }
    }

    /// Value rendered in `key[type]=value` lines (blobs render their size).
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::U8(v) => v.to_string(),
            Self::I8(v) => v.to_string(),
            Self::U16(v) => v.to_string(),
            Self::I16(v) => v.to_string(),
            Self::U32(v) => v.to_string(),
            Self::I32(v) => v.to_string(),
            Self::U64(v) => v.to_string(),
            Self::I64(v) => v.to_string(),
            Self::Str(v) => v.clone(),
            Self::Blob(v) => format!("<{} bytes>", v.len()),
        }
    }
}

/// Errors from the configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The key does not exist in any namespace.
    #[error("{0} not found")]
    NotFound(String),
    /// The backing store rejected the operation.
    #[error("config store failure: {0}")]
    Backend(String),
}

/// Storage behind the configuration store. The real device backs this with
/// the flash key/value driver; tests and the host build use memory.
pub trait ConfigBackend: Send {
    /// Read one entry.
    fn get(&self, namespace: &str, key: &str) -> Option<ConfigValue>;
    /// Write one entry, replacing any previous type.
    fn set(&mut self, namespace: &str, key: &str, value: ConfigValue);
    /// Remove one entry; reports whether it existed.
    fn erase(&mut self, namespace: &str, key: &str) -> bool;
    /// All entries of one namespace, sorted by key.
    fn entries(&self, namespace: Option<&str>) -> Vec<(String, String, ConfigValue)>;
    /// (used, total) entry counts for `config-info`.
    fn stats(&self) -> (usize, usize);
}

/// In-memory [`ConfigBackend`].
#[derive(Debug, Default)]
pub struct MemoryConfig {
    entries: BTreeMap<(String, String), ConfigValue>,
    capacity: usize,
}

impl MemoryConfig {
    /// Empty store with the default entry capacity.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), capacity: 504 }
    }
}

impl ConfigBackend for MemoryConfig {
    fn get(&self, namespace: &str, key: &str) -> Option<ConfigValue> {
        self.entries.get(&(namespace.to_string(), key.to_string())).cloned()
    }

    fn set(&mut self, namespace: &str, key: &str, value: ConfigValue) {
        self.entries.insert((namespace.to_string(), key.to_string()), value);
    }

    fn erase(&mut self, namespace: &str, key: &str) -> bool {
        self.entries.remove(&(namespace.to_string(), key.to_string())).is_some()
    }

    fn entries(&self, namespace: Option<&str>) -> Vec<(String, String, ConfigValue)> {
        self.entries
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|want| ns == want))
            .map(|((ns, key), value)| (ns.clone(), key.clone(), value.clone()))
            .collect()
    }

    fn stats(&self) -> (usize, usize) {
        (self.entries.len(), self.capacity)
    }
}

/// Cloneable handle over the process-wide configuration store.
#[derive(Clone)]
pub struct Config {
    backend: Arc<Mutex<dyn ConfigBackend>>,
}

impl Config {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: impl ConfigBackend + 'static) -> Self {
        Self { backend: Arc::new(Mutex::new(backend)) }
    }

    /// Store an unsigned integer under the core namespace.
    pub fn set_uint(&self, key: &str, value: u32) {
        if let Ok(mut backend) = self.backend.lock() {
            backend.set(CONFIG_NAMESPACE, key, ConfigValue::U32(value));
        }
    }

    /// Store a signed integer under the core namespace.
    pub fn set_int(&self, key: &str, value: i32) {
        if let Ok(mut backend) = self.backend.lock() {
            backend.set(CONFIG_NAMESPACE, key, ConfigValue::I32(value));
        }
    }

    /// Store a string under the core namespace.
    pub fn set_string(&self, key: &str, value: &str) {
        if let Ok(mut backend) = self.backend.lock() {
            backend.set(CONFIG_NAMESPACE, key, ConfigValue::Str(value.to_string()));
        }
    }

    /// Read any entry under the core namespace.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.backend.lock().ok().and_then(|backend| backend.get(CONFIG_NAMESPACE, key))
    }

    /// Read a string entry under the core namespace.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(ConfigValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Remove an entry; reports whether it existed.
    pub fn erase(&self, key: &str) -> bool {
        self.backend.lock().is_ok_and(|mut backend| backend.erase(CONFIG_NAMESPACE, key))
    }

    /// All entries, optionally restricted to one namespace, as rendered
    /// `key[type]=value` lines.
    #[must_use]
    pub fn dump(&self, namespace: Option<&str>) -> Vec<String> {
        let Ok(backend) = self.backend.lock() else {
            return Vec::new();
        };

        backend
            .entries(namespace)
            .into_iter()
            .map(|(_, key, value)| format!("{key}[{}]={}", value.type_name(), value.render()))
            .collect()
    }

    /// (used, free, total) entry counts for `config-info`.
    #[must_use]
    pub fn stats(&self) -> (usize, usize, usize) {
        let Ok(backend) = self.backend.lock() else {
            return (0, 0, 0);
        };
        let (used, total) = backend.stats();
        (used, total.saturating_sub(used), total)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_types() {
        let config = Config::new(MemoryConfig::new());

        config.set_uint("answer", 42);
        config.set_int("depth", -7);
        config.set_string(KEY_HOSTNAME, "node1");

        assert_eq!(config.get("answer"), Some(ConfigValue::U32(42)));
        assert_eq!(config.get("depth"), Some(ConfigValue::I32(-7)));
        assert_eq!(config.get_string(KEY_HOSTNAME).as_deref(), Some("node1"));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn set_replaces_type() {
        let config = Config::new(MemoryConfig::new());
        config.set_uint("key", 1);
        config.set_string("key", "text");
        assert_eq!(config.get("key"), Some(ConfigValue::Str("text".to_string())));
    }

    #[test]
    fn erase_reports_presence() {
        let config = Config::new(MemoryConfig::new());
        config.set_uint("gone", 1);
        assert!(config.erase("gone"));
        assert!(!config.erase("gone"));
    }

    #[test]
    fn dump_renders_key_type_value() {
        let config = Config::new(MemoryConfig::new());
        config.set_uint("mykey", 42);
        config.set_string("name", "x");

        let lines = config.dump(Some(CONFIG_NAMESPACE));
        assert!(lines.contains(&"mykey[uint32]=42".to_string()));
        assert!(lines.contains(&"name[string]=x".to_string()));
    }

    #[test]
    fn stats_track_usage() {
        let config = Config::new(MemoryConfig::new());
        config.set_uint("a", 1);
        config.set_uint("b", 2);
        let (used, free, total) = config.stats();
        assert_eq!(used, 2);
        assert_eq!(used + free, total);
    }
}
