//! Port trait definitions (Hexagonal Architecture)
//!
//! Async interfaces for the collaborators the engine drives:
//! - TestOracle: runs a suite against an artifact
//! - TransformationAgent: revises an artifact from failing-test feedback
//! - BehaviorProbe: observes an artifact for mutant activation checks
//! - TestGenerator: provides visible and hidden suites
//! - RunRecordStore: append-only run record persistence

pub mod behavior_probe;
pub mod run_record_store;
pub mod test_generator;
pub mod test_oracle;
pub mod transformation_agent;

pub use behavior_probe::BehaviorProbe;
pub use run_record_store::RunRecordStore;
pub use test_generator::{GeneratedSuites, TestGenerator};
pub use test_oracle::TestOracle;
pub use transformation_agent::{AgentRequest, AgentTurn, TransformationAgent};
