//! Run records and the per-run context that builds them.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::convergence::TerminalState;
use super::cost::CostRecord;
use super::specification::{SpecRef, SpecVersion};
use crate::domain::errors::{DomainError, DomainResult};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    TestGeneration,
    Convergence,
    HiddenEvaluation,
    Mutation,
    Regression,
}

impl Stage {
    pub const ALL: [Self; 6] = [
        Self::Init,
        Self::TestGeneration,
        Self::Convergence,
        Self::HiddenEvaluation,
        Self::Mutation,
        Self::Regression,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::TestGeneration => "test_generation",
            Self::Convergence => "convergence",
            Self::HiddenEvaluation => "hidden_evaluation",
            Self::Mutation => "mutation",
            Self::Regression => "regression",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pass,
    Fail,
    #[default]
    Skipped,
    Aborted,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// A stage's status and, unless it passed, why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub reason: Option<String>,
}

impl StageOutcome {
    pub const fn pass() -> Self {
        Self {
            status: StageStatus::Pass,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            reason: Some(reason.into()),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Aborted,
            reason: Some(reason.into()),
        }
    }
}

/// Status of every stage. All six are always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcomes {
    pub init: StageStatus,
    pub test_generation: StageStatus,
    pub convergence: StageStatus,
    pub hidden_evaluation: StageStatus,
    pub mutation: StageStatus,
    pub regression: StageStatus,
}

impl StageOutcomes {
    pub const fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Init => self.init,
            Stage::TestGeneration => self.test_generation,
            Stage::Convergence => self.convergence,
            Stage::HiddenEvaluation => self.hidden_evaluation,
            Stage::Mutation => self.mutation,
            Stage::Regression => self.regression,
        }
    }

    fn set(&mut self, stage: Stage, status: StageStatus) {
        let slot = match stage {
            Stage::Init => &mut self.init,
            Stage::TestGeneration => &mut self.test_generation,
            Stage::Convergence => &mut self.convergence,
            Stage::HiddenEvaluation => &mut self.hidden_evaluation,
            Stage::Mutation => &mut self.mutation,
            Stage::Regression => &mut self.regression,
        };
        *slot = status;
    }
}

// ---------------------------------------------------------------------------
// Metrics, timing, costs
// ---------------------------------------------------------------------------

/// Derived metrics. Every field is present in every record; a stage that did
/// not run leaves zeros (and `None` for the mutation score).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub vpr_passed: u32,
    pub vpr_total: u32,
    pub vpr_percent: f64,
    pub vpr_no_tests: bool,
    pub hpr_passed: u32,
    pub hpr_total: u32,
    pub hpr_percent: f64,
    pub hpr_no_tests: bool,
    pub mutation_total: u32,
    pub mutation_activated: u32,
    pub mutation_killed: u32,
    pub mutation_survived: u32,
    pub mutation_inconclusive: u32,
    pub mutation_inapplicable: u32,
    pub mutation_errored: u32,
    /// `None` when no mutant activated.
    pub mutation_score: Option<f64>,
    pub mutation_trials: u32,
    pub surs_passed: u32,
    pub surs_total: u32,
    pub surs_percent: f64,
    pub surs_no_tests: bool,
    pub compiler_iterations: u32,
    pub convergence_state: Option<TerminalState>,
    pub seed_vpr_passed: u32,
    pub seed_vpr_total: u32,
}

/// Wall-clock seconds per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTiming {
    pub test_generation_seconds: f64,
    pub convergence_seconds: f64,
    pub hidden_evaluation_seconds: f64,
    pub mutation_seconds: f64,
    pub regression_seconds: f64,
    pub total_seconds: f64,
}

impl RunTiming {
    fn set(&mut self, stage: Stage, elapsed: Duration) {
        let secs = round_to(elapsed.as_secs_f64(), 1);
        match stage {
            Stage::Init => {}
            Stage::TestGeneration => self.test_generation_seconds = secs,
            Stage::Convergence => self.convergence_seconds = secs,
            Stage::HiddenEvaluation => self.hidden_evaluation_seconds = secs,
            Stage::Mutation => self.mutation_seconds = secs,
            Stage::Regression => self.regression_seconds = secs,
        }
    }
}

/// Cost per stage; `total` is the exact sum of the stage fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCosts {
    pub test_generation: CostRecord,
    pub convergence: CostRecord,
    pub hidden_evaluation: CostRecord,
    pub mutation: CostRecord,
    pub regression: CostRecord,
    pub total: CostRecord,
}

impl RunCosts {
    fn from_stages(stages: &BTreeMap<Stage, CostRecord>) -> Self {
        let get = |stage| stages.get(&stage).copied().unwrap_or_default();
        Self {
            test_generation: get(Stage::TestGeneration),
            convergence: get(Stage::Convergence),
            hidden_evaluation: get(Stage::HiddenEvaluation),
            mutation: get(Stage::Mutation),
            regression: get(Stage::Regression),
            total: stages.values().copied().sum(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Immutable snapshot of one pipeline execution for one specification version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub date: String,
    pub time: String,
    pub spec: String,
    pub version: SpecVersion,
    pub stages: StageOutcomes,
    /// Why each non-passing stage ended the way it did.
    #[serde(default)]
    pub stage_reasons: BTreeMap<Stage, String>,
    pub metrics: RunMetrics,
    pub timing: RunTiming,
    pub costs: RunCosts,
}

impl RunRecord {
    /// Deterministic storage key `(spec, version, run_id)`.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.spec, self.version, self.run_id)
    }
}

/// Mutable accumulator for one `(spec, version)` run, created fresh per run.
///
/// Stage outcomes and stage costs are write-once; a second write is an error
/// rather than an overwrite.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    started_at: DateTime<Local>,
    spec: SpecRef,
    stages: BTreeMap<Stage, StageOutcome>,
    costs: BTreeMap<Stage, CostRecord>,
    timing: RunTiming,
    metrics: RunMetrics,
}

impl RunContext {
    pub fn new(spec: SpecRef) -> Self {
        let started_at = Local::now();
        let short = Uuid::new_v4().simple().to_string();
        Self {
            run_id: format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), &short[..8]),
            started_at,
            spec,
            stages: BTreeMap::new(),
            costs: BTreeMap::new(),
            timing: RunTiming::default(),
            metrics: RunMetrics::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub const fn spec(&self) -> &SpecRef {
        &self.spec
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.get(&stage)
    }

    pub fn record_stage(&mut self, stage: Stage, outcome: StageOutcome) -> DomainResult<()> {
        if self.stages.contains_key(&stage) {
            return Err(DomainError::StageAlreadyRecorded(stage));
        }
        self.stages.insert(stage, outcome);
        Ok(())
    }

    pub fn record_cost(&mut self, stage: Stage, cost: CostRecord) -> DomainResult<()> {
        if self.costs.contains_key(&stage) {
            return Err(DomainError::CostAlreadyRecorded(stage));
        }
        self.costs.insert(stage, cost);
        Ok(())
    }

    pub fn record_timing(&mut self, stage: Stage, elapsed: Duration) {
        self.timing.set(stage, elapsed);
    }

    pub const fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut RunMetrics {
        &mut self.metrics
    }

    /// Mark every stage without an outcome as aborted.
    pub fn abort(&mut self, reason: &str) {
        for stage in Stage::ALL {
            self.stages
                .entry(stage)
                .or_insert_with(|| StageOutcome::aborted(reason));
        }
    }

    /// Seal the context into a record. Stages never reached are `skipped`.
    pub fn finish(mut self, total_elapsed: Duration) -> RunRecord {
        for stage in Stage::ALL {
            self.stages
                .entry(stage)
                .or_insert_with(|| StageOutcome::skipped("stage not reached"));
        }

        let mut stages = StageOutcomes::default();
        let mut stage_reasons = BTreeMap::new();
        for (stage, outcome) in self.stages {
            stages.set(stage, outcome.status);
            if let Some(reason) = outcome.reason {
                stage_reasons.insert(stage, reason);
            }
        }

        self.timing.total_seconds = round_to(total_elapsed.as_secs_f64(), 1);

        RunRecord {
            run_id: self.run_id,
            date: self.started_at.format("%Y-%m-%d").to_string(),
            time: self.started_at.format("%H:%M:%S").to_string(),
            spec: self.spec.name,
            version: self.spec.version,
            stages,
            stage_reasons,
            metrics: self.metrics,
            timing: self.timing,
            costs: RunCosts::from_stages(&self.costs),
        }
    }
}
