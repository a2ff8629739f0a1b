pub mod artifact;
pub mod config;
pub mod convergence;
pub mod cost;
pub mod mutation;
pub mod run_record;
pub mod specification;
pub mod suite;

pub use artifact::Artifact;
pub use config::{
    AgentConfig, Config, ConvergenceConfig, LogFormat, LoggingConfig, MutationConfig,
    OracleConfig, RotationPolicy, StoreConfig,
};
pub use convergence::{
    ConvergenceResult, DriverEvent, DriverState, IterationRecord, TerminalState,
};
pub use cost::{parse_usd_micros, CostRecord};
pub use mutation::{
    MutantOutcome, MutantVerdict, MutationCounts, MutationIntent, MutationPack, MutationPatch,
    MutationReport, MutationScore, PatchEdit, ProbeObservation, TrialAggregate, TrialPolicy,
    TrialReport,
};
pub use run_record::{
    RunContext, RunCosts, RunMetrics, RunRecord, RunTiming, Stage, StageOutcome, StageOutcomes,
    StageStatus,
};
pub use specification::{SpecRef, SpecVersion};
pub use suite::{
    OracleFeedback, OracleRun, OracleVerdict, SuitePartition, TestSummary, TestTarget,
};
