//! Mirror and patchbay settings

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
///
/// Stored as YAML (see [`super::default_config_path`]). Every field has a
/// default, so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Client name announced to the remote routing service
    pub client_name: String,

    /// Delay before retrying an unreachable or failed remote session
    /// Default: 3000 ms
    pub reconnect_backoff_ms: u64,

    /// How long the worker blocks in one remote poll
    /// Default: 50 ms
    pub poll_interval_ms: u64,

    /// How long `connect()` waits for the remote round-trip
    /// Default: 2000 ms
    pub connect_timeout_ms: u64,

    /// Capacity of the worker -> mirror notification channel
    pub notification_capacity: usize,

    /// Label presentation nodes with the remote nickname when one exists
    pub prefer_nicknames: bool,

    /// Regex patterns; nodes whose name matches any of them are not presented
    pub node_filters: Vec<String>,

    /// Patchbay rule settings
    pub patchbay: PatchbaySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: "mesh-patchbay".to_string(),
            reconnect_backoff_ms: 3000,
            poll_interval_ms: 50,
            connect_timeout_ms: 2000,
            notification_capacity: 1024,
            prefer_nicknames: false,
            node_filters: Vec::new(),
            patchbay: PatchbaySettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Compile the node filters, skipping (and logging) invalid patterns
    pub fn compiled_filters(&self) -> Vec<Regex> {
        self.node_filters
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Ignoring invalid node filter '{}': {}", pattern, e);
                    None
                }
            })
            .collect()
    }
}

/// Patchbay rule settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchbaySettings {
    /// Rule file location (None = default rules path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,

    /// Create missing ruled connections
    pub active: bool,

    /// Tear down connections competing for a ruled endpoint
    pub exclusive: bool,

    /// While inactive, remove connections that match a rule
    pub auto_disconnect: bool,
}

impl PatchbaySettings {
    pub fn rules_path(&self) -> PathBuf {
        self.rules_path
            .clone()
            .unwrap_or_else(super::default_rules_path)
    }
}
