//! Domain errors for the TDAD evaluation engine.

use std::time::Duration;

use thiserror::Error;

use super::models::cost::CostRecord;
use super::models::run_record::Stage;

/// Domain-level errors raised by the data model itself.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid specification version: {0} (expected v<N> with N >= 1)")]
    InvalidVersion(String),

    #[error("Stage {0} already has a recorded outcome")]
    StageAlreadyRecorded(Stage),

    #[error("Stage {0} already reported its cost")]
    CostAlreadyRecorded(Stage),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures of the test oracle itself, as opposed to failing tests.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Failed to spawn test oracle: {0}")]
    Spawn(String),

    #[error("Test oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("Test oracle infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("Test oracle I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the transformation agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn transformation agent: {0}")]
    Spawn(String),

    #[error("Transformation agent exited with status {code:?}: {stderr}")]
    Failed {
        code: Option<i32>,
        stderr: String,
        /// Usage the agent reported before failing.
        cost: CostRecord,
    },

    #[error("Transformation agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read revised artifact: {reason}")]
    ArtifactReadBack { reason: String, cost: CostRecord },

    #[error("Transformation agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Cost incurred by the failed invocation, zero when the agent never ran
    /// to completion.
    pub fn cost(&self) -> CostRecord {
        match self {
            Self::Failed { cost, .. } | Self::ArtifactReadBack { cost, .. } => *cost,
            Self::Spawn(_) | Self::Timeout(_) | Self::Io(_) => CostRecord::zero(),
        }
    }
}

/// A mutation patch that cannot be structurally applied to the reference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("Patch has no edits")]
    Empty,

    #[error("Edit {index} has an empty search text")]
    EmptySearch { index: usize },

    #[error("Edit {index} search text not found in reference")]
    NotFound { index: usize },
}

/// Violations of the pass-rate and regression-score preconditions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("passed ({passed}) exceeds total ({total})")]
    PassedExceedsTotal { passed: u32, total: u32 },

    #[error("{metric} requires the {expected} suite, got {actual}")]
    WrongSuite {
        metric: &'static str,
        expected: String,
        actual: String,
    },

    #[error("SURS is only defined for v2 and later, got {0}")]
    NoPriorVersion(String),
}

/// Failures preparing the visible and hidden suites.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Test suite not found at {0}")]
    MissingSuite(String),

    #[error("Test generation failed: {0}")]
    Failed(String),
}

/// Run-record persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record {0} was already persisted")]
    AlreadyExists(String),

    #[error("Timed out acquiring ledger lock {0}")]
    LockTimeout(String),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
