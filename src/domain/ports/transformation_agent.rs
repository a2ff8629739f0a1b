//! Transformation agent port - revises an artifact given failing-test feedback.

use async_trait::async_trait;

use crate::domain::errors::AgentError;
use crate::domain::models::{Artifact, CostRecord, OracleFeedback, SpecRef};

/// One revision request.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub spec: SpecRef,
    /// 1-based iteration number.
    pub iteration: u32,
    pub max_iterations: u32,
    pub artifact: Artifact,
    /// Feedback from the most recent oracle run, if any.
    pub feedback: Option<OracleFeedback>,
}

/// The agent's answer to one [`AgentRequest`].
#[derive(Debug, Clone)]
pub struct AgentTurn {
    /// The next artifact revision.
    pub artifact: Artifact,
    /// Cost parsed from the agent's structured output; zero when not reported.
    pub cost: CostRecord,
    pub transcript: String,
}

/// An opaque capability that edits the artifact.
#[async_trait]
pub trait TransformationAgent: Send + Sync {
    async fn revise(&self, request: AgentRequest) -> Result<AgentTurn, AgentError>;
}
