//! Path utilities for patchbay configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `~/.config/mesh` (platform config dir, falling back to `./.config/mesh`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".").join(".config"))
        .join("mesh")
}

/// Get the default path of a config file
///
/// Returns: `~/.config/mesh/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

/// Get the default patchbay rule file path
///
/// Returns: `~/.config/mesh/patchbay-rules.yaml`
pub fn default_rules_path() -> PathBuf {
    default_config_path("patchbay-rules.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_mesh() {
        assert!(default_config_dir().ends_with("mesh"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("test.yaml");
        assert!(path.ends_with("test.yaml"));
        assert!(default_rules_path().ends_with("patchbay-rules.yaml"));
    }
}
