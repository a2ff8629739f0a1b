//! Hierarchical configuration using figment: defaults, project YAML,
//! local YAML, then `TDAD_*` environment overrides.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
