//! Behavior probe port - observes an artifact for activation checks.

use async_trait::async_trait;

use crate::domain::errors::OracleError;
use crate::domain::models::{Artifact, MutationIntent, ProbeObservation};

/// Produces a deterministic observation of an artifact's behavior.
///
/// Two artifacts behave differently iff their observations differ. `intent`
/// is `None` for the shared reference baseline and `Some` when probing on
/// behalf of one mutation, whose `activation_probe` a probe may use to
/// narrow what it observes.
#[async_trait]
pub trait BehaviorProbe: Send + Sync {
    async fn observe(
        &self,
        intent: Option<&MutationIntent>,
        artifact: &Artifact,
    ) -> Result<ProbeObservation, OracleError>;
}
