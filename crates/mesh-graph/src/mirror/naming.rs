//! Node naming: descriptive-name resolution and the dedupe index table

use crate::remote::{keys, Properties};
use crate::types::{Directionality, MediaCategory};
use std::collections::{BTreeMap, BTreeSet};

/// Identity a dedupe index is scoped to
pub type NameKey = (String, Directionality, MediaCategory);

/// Names derived from a node's property bag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeNames {
    /// Identity name: description, else name, else nickname
    pub name: String,
    /// Short label: nickname, else description
    pub nickname: String,
}

impl NodeNames {
    /// Resolve names; `None` until any descriptive key is present
    pub fn from_props(props: &Properties) -> Option<Self> {
        let description = props.get_text(keys::NODE_DESCRIPTION);
        let name = props.get_text(keys::NODE_NAME);
        let nick = props.get_text(keys::NODE_NICK);

        let identity = description.or(name).or(nick)?;
        let nickname = nick.or(description).unwrap_or(identity);
        Some(Self {
            name: identity.to_string(),
            nickname: nickname.to_string(),
        })
    }
}

/// Label shown for a node; later duplicates get a " (n)" suffix
pub fn display_label(base: &str, dedupe_index: Option<u32>) -> String {
    match dedupe_index {
        Some(index) if index > 0 => format!("{} ({})", base, index + 1),
        _ => base.to_string(),
    }
}

/// Indices in use per `(name, directionality, category)`
///
/// Every live, ready node holds exactly one index under its key. A new node
/// gets the smallest index not held by another live node with the same key.
#[derive(Debug, Default)]
pub struct NameIndexTable {
    used: BTreeMap<NameKey, BTreeSet<u32>>,
}

impl NameIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the smallest free index under `key`
    pub fn acquire(&mut self, key: &NameKey) -> u32 {
        let used = self.used.entry(key.clone()).or_default();
        let index = (0..).find(|i| !used.contains(i)).unwrap_or_default();
        used.insert(index);
        index
    }

    /// Give an index back
    pub fn release(&mut self, key: &NameKey, index: u32) {
        if let Some(used) = self.used.get_mut(key) {
            used.remove(&index);
            if used.is_empty() {
                self.used.remove(key);
            }
        }
    }

    pub fn in_use(&self, key: &NameKey) -> usize {
        self.used.get(key).map_or(0, BTreeSet::len)
    }

    pub fn clear(&mut self) {
        self.used.clear();
    }
}
