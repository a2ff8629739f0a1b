//! Test oracle port - runs a test suite against an artifact.

use async_trait::async_trait;

use crate::domain::errors::OracleError;
use crate::domain::models::{Artifact, OracleRun, TestTarget};

/// A black-box test harness.
///
/// Returning `Ok` means the harness ran to completion, even if tests failed
/// or nothing was collected; callers classify the run with
/// [`OracleRun::verdict`]. `Err` is reserved for failures to invoke the
/// harness at all.
#[async_trait]
pub trait TestOracle: Send + Sync {
    async fn run(&self, target: &TestTarget, artifact: &Artifact) -> Result<OracleRun, OracleError>;
}
