//! Engine configuration
//!
//! `EngineConfig` lives in a YAML file next to the other Mesh configs
//! (`~/.config/mesh/patchbay.yaml`); the patchbay rules have their own file
//! in the same directory.
//!
//! ```ignore
//! use mesh_graph::config::{default_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path("patchbay.yaml"));
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{EngineConfig, PatchbaySettings};
pub use io::{load_config, save_config, try_load_config};
pub use paths::{default_config_dir, default_config_path, default_rules_path};
