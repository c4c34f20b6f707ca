//! Configuration loading
//!
//! Files (TOML or JSON) and `VIGIL_*` environment variables merged into
//! [`vigil_domain::Config`].

pub mod loader;

// Re-export commonly used items
pub use loader::{apply_env_overrides, load, load_from_env, load_from_file, probe_config_paths};
