//! Infrastructure layer module
//!
//! Adapters satisfying the domain ports:
//! - Configuration (figment) and logging (tracing)
//! - Process-backed test oracle and transformation agent
//! - Preset suite provisioning and mutation pack loading
//! - JSON-file run record store
//! - Versioned storage layout

pub mod agent;
pub mod config;
pub mod generator;
pub mod layout;
pub mod logging;
pub mod mutation_pack;
pub mod oracle;
pub mod store;
