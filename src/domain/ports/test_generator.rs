//! Test generator port - provides the visible and hidden suites for a spec.

use async_trait::async_trait;

use crate::domain::errors::GenerationError;
use crate::domain::models::{CostRecord, SpecRef, TestTarget};

/// Both halves of a specification's test suite.
#[derive(Debug, Clone)]
pub struct GeneratedSuites {
    pub visible: TestTarget,
    pub hidden: TestTarget,
    pub cost: CostRecord,
}

#[async_trait]
pub trait TestGenerator: Send + Sync {
    /// Make both suites available for `spec`.
    async fn prepare(&self, spec: &SpecRef) -> Result<GeneratedSuites, GenerationError>;

    /// Where the visible suite of `spec` lives, whether or not it exists yet.
    ///
    /// Used to address the prior version's suite for regression scoring.
    fn visible_target(&self, spec: &SpecRef) -> TestTarget;
}
