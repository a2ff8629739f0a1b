//! Application services: the evaluation engine proper.

pub mod abort;
pub mod convergence_driver;
pub mod metrics;
pub mod mutation_engine;
pub mod pipeline;
pub mod run_aggregator;
pub mod summary_parser;

pub use abort::{AbortHandle, AbortSignal};
pub use convergence_driver::{ConvergenceDriver, DriverSettings};
pub use metrics::{pass_rate, PassRate};
pub use mutation_engine::{MutationEngine, MutationSettings, SuiteReplayProbe};
pub use pipeline::{EvaluationPipeline, PipelineOutcome, PipelineRequest, PipelineSettings};
pub use run_aggregator::{aggregate_runs, MetricStats, SpecVersionAggregate};
