//! Domain layer for the TDAD evaluation engine
//!
//! This module contains the data model, collaborator ports and error types.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{
    AgentError, DomainError, DomainResult, GenerationError, MetricsError, OracleError, PatchError,
    StoreError,
};
