//! Command aliases.
//!
//! A mutable ordered map from name to substitution text, applied to the
//! first whitespace-delimited token of every command line before dispatch.

use std::collections::BTreeMap;

/// Practical cap on stored aliases.
pub const ALIAS_CAPACITY: usize = 64;

/// Ordered `name -> substitution` map.
#[derive(Debug, Default)]
pub struct AliasStore {
    aliases: BTreeMap<String, String>,
}

impl AliasStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update an alias. Returns `false` when the store is full.
    pub fn set(&mut self, name: &str, substitution: &str) -> bool {
        if !self.aliases.contains_key(name) && self.aliases.len() >= ALIAS_CAPACITY {
            return false;
        }

        self.aliases.insert(name.to_string(), substitution.to_string());
        true
    }

    /// Remove an alias if present.
    pub fn remove(&mut self, name: &str) {
        self.aliases.remove(name);
    }

    /// Iterate entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(name, text)| (name.as_str(), text.as_str()))
    }

    /// Replace the first whitespace-delimited token when it names an alias;
    /// otherwise return the line unchanged.
    #[must_use]
    pub fn expand(&self, line: &str) -> String {
        let trimmed_start = line.len() - line.trim_start().len();
        let rest = &line[trimmed_start..];

        let token_end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        let token = &rest[..token_end];

        if token.is_empty() {
            return line.to_string();
        }

        match self.aliases.get(token) {
            Some(substitution) => {
                format!("{}{}{}", &line[..trimmed_start], substitution, &rest[token_end..])
            },
            None => line.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_replaces_first_token_only() {
        let mut store = AliasStore::new();
        store.set("h", "help");

        assert_eq!(store.expand("h"), "help");
        assert_eq!(store.expand("h info"), "help info");
        assert_eq!(store.expand("hostname h"), "hostname h");
    }

    #[test]
    fn expand_preserves_rest_of_line() {
        let mut store = AliasStore::new();
        store.set("w", "write");

        assert_eq!(store.expand("w hello  world"), "write hello  world");
    }

    #[test]
    fn unknown_token_passes_through() {
        let store = AliasStore::new();
        assert_eq!(store.expand("help me"), "help me");
        assert_eq!(store.expand(""), "");
    }

    #[test]
    fn removal_restores_original_resolution() {
        let mut store = AliasStore::new();
        store.set("x", "help");
        assert_eq!(store.expand("x"), "help");

        store.remove("x");
        assert_eq!(store.expand("x"), "x");
    }

    #[test]
    fn capacity_is_bounded() {
        let mut store = AliasStore::new();
        for i in 0..ALIAS_CAPACITY {
            assert!(store.set(&format!("a{i}"), "x"));
        }
        assert!(!store.set("overflow", "x"));
        // Updating an existing entry still works at capacity.
        assert!(store.set("a0", "y"));
    }
}
