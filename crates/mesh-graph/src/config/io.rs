//! YAML config file I/O
//!
//! [`try_load_config`] reports every problem; [`load_config`] is the lenient
//! variant the daemon uses at startup, falling back to defaults.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;

/// Read a config file, `Ok(None)` when it does not exist
pub fn try_load_config<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };
    let config = serde_yaml::from_str(&contents).with_context(|| format!("Invalid config in {:?}", path))?;
    Ok(Some(config))
}

/// Read a config file, using defaults when it is missing or broken
pub fn load_config<T: DeserializeOwned + Default>(path: &Path) -> T {
    match try_load_config(path) {
        Ok(Some(config)) => {
            log::info!("[CONFIG] Loaded {:?}", path);
            config
        }
        Ok(None) => {
            log::info!("[CONFIG] No config at {:?}, using defaults", path);
            T::default()
        }
        Err(e) => {
            log::warn!("[CONFIG] {:#}; using defaults", e);
            T::default()
        }
    }
}

/// Write a config file, creating its directory first
pub fn save_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("[CONFIG] Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/path/patchbay.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_invalid_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "poll_interval_ms: [not, a, number]").unwrap();

        let config: EngineConfig = load_config(&path);
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("patchbay.yaml");

        let mut config = EngineConfig::default();
        config.client_name = "studio".to_string();
        config.node_filters = vec!["^Dummy".to_string()];
        config.patchbay.exclusive = true;

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_strict_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "client_name: [unterminated").unwrap();

        assert!(try_load_config::<EngineConfig>(&path).is_err());
        assert!(try_load_config::<EngineConfig>(&dir.path().join("absent.yaml"))
            .unwrap()
            .is_none());
    }
}
