//! TDAD - test-driven artifact development
//!
//! An evaluation and convergence engine for opaque artifacts (such as system
//! prompts) that are judged only through black-box test suites.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): data model, errors, and the ports to the
//!   test oracle, transformation agent, behavior probe, test generator and
//!   run record store
//! - **Service Layer** (`services`): convergence driver, mutation engine,
//!   metrics, cross-run aggregation, and the staged pipeline
//! - **Infrastructure Layer** (`infrastructure`): process-backed adapters,
//!   JSON-file storage, configuration and logging
//! - **CLI Layer** (`cli`): `converge`, `mutate`, `run`, `report`
//!
//! # Example
//!
//! ```ignore
//! use tdad::services::{AbortSignal, ConvergenceDriver, DriverSettings};
//!
//! let driver = ConvergenceDriver::new(oracle, agent, DriverSettings::default(), AbortSignal::never());
//! let result = driver.run(seed, &visible_suite, 6).await;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{
    Artifact, Config, ConvergenceResult, CostRecord, MutationReport, RunRecord, SpecRef,
    SpecVersion, TerminalState,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AbortHandle, AbortSignal, ConvergenceDriver, EvaluationPipeline, MutationEngine,
};
