//! Remote property bags
//!
//! Every notification carries an opaque string->string bag. The keys the
//! mirror understands are listed in [`keys`]; anything else is carried along
//! and ignored.

use crate::types::ObjectId;
use std::collections::BTreeMap;

/// Property keys interpreted by the mirror
pub mod keys {
    pub const NODE_NAME: &str = "node.name";
    pub const NODE_NICK: &str = "node.nick";
    pub const NODE_DESCRIPTION: &str = "node.description";
    pub const MEDIA_CLASS: &str = "media.class";

    pub const PORT_NAME: &str = "port.name";
    pub const PORT_ALIAS: &str = "port.alias";
    pub const PORT_DIRECTION: &str = "port.direction";
    pub const FORMAT_DSP: &str = "format.dsp";
    pub const PORT_PHYSICAL: &str = "port.physical";
    pub const PORT_TERMINAL: &str = "port.terminal";
    pub const PORT_MONITOR: &str = "port.monitor";
    pub const PORT_CONTROL: &str = "port.control";
    /// Owning node of a port
    pub const NODE_ID: &str = "node.id";

    pub const LINK_OUTPUT_PORT: &str = "link.output.port";
    pub const LINK_INPUT_PORT: &str = "link.input.port";
}

/// Property bag attached to remote notifications
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Non-empty string value
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Boolean value ("true"/"1"/"yes"), absent = false
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("true" | "1" | "yes")
        )
    }

    /// Object id reference
    pub fn get_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Overlay `other` onto this bag, returning true if any value changed
    pub fn merge(&mut self, other: &Properties) -> bool {
        let mut changed = false;
        for (key, value) in other.iter() {
            if self.get(key) != Some(value) {
                self.insert(key, value);
                changed = true;
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let props = Properties::new()
            .with(keys::NODE_ID, " 42 ")
            .with(keys::PORT_PHYSICAL, "true")
            .with(keys::PORT_TERMINAL, "0")
            .with(keys::PORT_NAME, "   ");

        assert_eq!(props.get_id(keys::NODE_ID), Some(42));
        assert!(props.get_bool(keys::PORT_PHYSICAL));
        assert!(!props.get_bool(keys::PORT_TERMINAL));
        assert!(!props.get_bool(keys::PORT_MONITOR));
        assert_eq!(props.get_text(keys::PORT_NAME), None);
    }

    #[test]
    fn test_merge_reports_changes() {
        let mut props = Properties::new().with(keys::NODE_NAME, "a");
        assert!(!props.merge(&Properties::new().with(keys::NODE_NAME, "a")));
        assert!(props.merge(&Properties::new().with(keys::NODE_NICK, "nick")));
        assert_eq!(props.get(keys::NODE_NICK), Some("nick"));
        assert_eq!(props.len(), 2);
    }
}
