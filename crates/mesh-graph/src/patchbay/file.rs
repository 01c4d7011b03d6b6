//! Rule file format
//!
//! ```yaml
//! version: 1
//! rules:
//!   - node_type: remote-service
//!     port_type: audio
//!     output: { node: "Synth", port: "out_L" }
//!     input: { node: "Speakers", port: "playback_FL" }
//!     exclusive: true   # optional per-rule override
//! ```
//!
//! A record with an unknown tag or a missing field is skipped with a warning;
//! the rest of the file still loads.

use super::PatchbayRule;
use crate::error::PatchbayFileError;
use crate::types::{NodeCategory, PortKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Newest format version this build reads and writes
pub const RULE_FILE_VERSION: u32 = 1;

/// Rules and per-rule overrides as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub rules: BTreeSet<PatchbayRule>,
    pub exclusive_overrides: BTreeMap<PatchbayRule, bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Endpoint {
    node: String,
    port: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RuleRecord {
    node_type: String,
    port_type: String,
    output: Endpoint,
    input: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclusive: Option<bool>,
}

#[derive(Debug, Serialize)]
struct RuleDocument<'a> {
    version: u32,
    rules: &'a [RuleRecord],
}

impl RuleRecord {
    fn from_rule(rule: &PatchbayRule, exclusive: Option<bool>) -> Self {
        Self {
            node_type: rule.node_category.tag().to_string(),
            port_type: rule.port_kind.tag().to_string(),
            output: Endpoint {
                node: rule.output_node.clone(),
                port: rule.output_port.clone(),
            },
            input: Endpoint {
                node: rule.input_node.clone(),
                port: rule.input_port.clone(),
            },
            exclusive,
        }
    }

    fn into_rule(self) -> Result<(PatchbayRule, Option<bool>), String> {
        let node_category: NodeCategory = self.node_type.parse()?;
        let port_kind: PortKind = self.port_type.parse()?;
        let names = [
            &self.output.node,
            &self.output.port,
            &self.input.node,
            &self.input.port,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err("empty node or port name".to_string());
        }
        let rule = PatchbayRule {
            node_category,
            port_kind,
            output_node: self.output.node,
            output_port: self.output.port,
            input_node: self.input.node,
            input_port: self.input.port,
        };
        Ok((rule, self.exclusive))
    }
}

/// Parse a rule document
pub fn parse_rules(contents: &str) -> Result<RuleSet, PatchbayFileError> {
    let document: serde_yaml::Value = serde_yaml::from_str(contents)?;

    let version = document
        .get("version")
        .and_then(serde_yaml::Value::as_u64)
        .ok_or(PatchbayFileError::MissingVersion)?;
    if version > u64::from(RULE_FILE_VERSION) {
        return Err(PatchbayFileError::UnsupportedVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: RULE_FILE_VERSION,
        });
    }

    let mut set = RuleSet::default();
    let records = match document.get("rules") {
        None | Some(serde_yaml::Value::Null) => Vec::new(),
        Some(serde_yaml::Value::Sequence(records)) => records.clone(),
        Some(_) => return Err(PatchbayFileError::RulesNotSequence),
    };

    for (index, record) in records.into_iter().enumerate() {
        let parsed = serde_yaml::from_value::<RuleRecord>(record)
            .map_err(|e| e.to_string())
            .and_then(RuleRecord::into_rule);
        match parsed {
            Ok((rule, exclusive)) => {
                if let Some(exclusive) = exclusive {
                    set.exclusive_overrides.insert(rule.clone(), exclusive);
                }
                set.rules.insert(rule);
            }
            Err(e) => log::warn!("[PATCHBAY] Skipping rule #{}: {}", index + 1, e),
        }
    }
    Ok(set)
}

/// Render a rule document
pub fn render_rules(set: &RuleSet) -> Result<String, PatchbayFileError> {
    let records: Vec<RuleRecord> = set
        .rules
        .iter()
        .map(|rule| RuleRecord::from_rule(rule, set.exclusive_overrides.get(rule).copied()))
        .collect();
    let document = RuleDocument {
        version: RULE_FILE_VERSION,
        rules: &records,
    };
    Ok(serde_yaml::to_string(&document)?)
}

/// Load a rule file
pub fn load_rules(path: &Path) -> Result<RuleSet, PatchbayFileError> {
    let contents = std::fs::read_to_string(path).map_err(|source| PatchbayFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rules(&contents)
}

/// Save a rule file, creating parent directories as needed
pub fn save_rules(path: &Path, set: &RuleSet) -> Result<(), PatchbayFileError> {
    let contents = render_rules(set)?;
    let write_error = |source| PatchbayFileError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    std::fs::write(path, contents).map_err(write_error)
}
