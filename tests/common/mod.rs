//! Shared in-memory collaborators for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tdad::domain::errors::{AgentError, GenerationError, OracleError, StoreError};
use tdad::domain::models::{
    Artifact, CostRecord, MutationIntent, MutationPatch, OracleRun, PatchEdit, RunRecord,
    SpecRef, SpecVersion, SuitePartition, TestSummary, TestTarget, TrialPolicy,
};
use tdad::domain::ports::{
    AgentRequest, AgentTurn, GeneratedSuites, RunRecordStore, TestGenerator, TestOracle,
    TransformationAgent,
};
use tdad::services::{DriverSettings, MutationSettings, PipelineSettings};

/// Setup test logging
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn spec(name: &str, version: SpecVersion) -> SpecRef {
    SpecRef::new(name, version)
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

type Script = dyn Fn(&TestTarget, &Artifact) -> Result<OracleRun, OracleError> + Send + Sync;

/// An oracle whose verdicts come from a closure over target and artifact.
pub struct ScriptedOracle {
    script: Box<Script>,
    calls: AtomicU32,
}

impl ScriptedOracle {
    pub fn new(
        script: impl Fn(&TestTarget, &Artifact) -> Result<OracleRun, OracleError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestOracle for ScriptedOracle {
    async fn run(&self, target: &TestTarget, artifact: &Artifact) -> Result<OracleRun, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(target, artifact)
    }
}

/// A pytest-like run where `passed` of `passed + failed` tests pass.
pub fn pytest_run(passed: u32, failed: u32) -> OracleRun {
    let failing_tests: Vec<String> = (0..failed)
        .map(|i| format!("tests/test_behavior.py::test_case_{i}"))
        .collect();
    let mut output: String = failing_tests
        .iter()
        .map(|id| format!("FAILED {id} - AssertionError\n"))
        .collect();
    output.push_str(&format!("==== {failed} failed, {passed} passed in 0.42s ====\n"));
    OracleRun {
        exit_code: Some(i32::from(failed > 0)),
        summary: Some(TestSummary::new(passed, failed)),
        failing_tests,
        output,
        ..OracleRun::default()
    }
}

/// Same as [`pytest_run`] but reporting an evaluation cost.
pub fn costed_run(passed: u32, failed: u32, cost_micros: u64) -> OracleRun {
    OracleRun {
        cost: CostRecord {
            input_tokens: 100,
            output_tokens: 10,
            cost_micros,
            ..CostRecord::zero()
        },
        ..pytest_run(passed, failed)
    }
}

/// Passes `min(revision * step, total)` of `total` tests.
pub fn ramp(total: u32, step: u32, revision: u32) -> OracleRun {
    let passed = revision.saturating_mul(step).min(total);
    pytest_run(passed, total - passed)
}

/// Fails one extra test per `BUG:<name>` marker found in `artifact`.
pub fn marker_run(tests: u32, artifact: &Artifact) -> OracleRun {
    let failing: Vec<String> = artifact
        .content()
        .split_whitespace()
        .filter_map(|w| w.strip_prefix("BUG:"))
        .map(|name| format!("tests/test_policy.py::{name}"))
        .collect();
    let failed = u32::try_from(failing.len()).unwrap();
    OracleRun {
        exit_code: Some(i32::from(failed > 0)),
        summary: Some(TestSummary::new(tests - failed, failed)),
        failing_tests: failing,
        ..OracleRun::default()
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Appends one rule line per turn and reports a fixed cost.
pub struct AppendingAgent {
    calls: AtomicU32,
    delay: Duration,
    pub cost: CostRecord,
}

impl AppendingAgent {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            cost: CostRecord {
                input_tokens: 1_000,
                output_tokens: 200,
                cost_micros: 12_345,
                ..CostRecord::zero()
            },
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransformationAgent for AppendingAgent {
    async fn revise(&self, request: AgentRequest) -> Result<AgentTurn, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = request
            .feedback
            .as_ref()
            .map_or(0, |f| f.failing_tests.len());
        let content = format!(
            "{}\nrule {} fixes {failing} failures.",
            request.artifact.content(),
            request.iteration
        );
        Ok(AgentTurn {
            artifact: request.artifact.revise(content),
            cost: self.cost,
            transcript: String::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Suites at fixed relative paths; optionally fails to prepare.
pub struct FixedSuites {
    fail: bool,
    pub cost: CostRecord,
}

impl FixedSuites {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            cost: CostRecord {
                input_tokens: 500,
                output_tokens: 50,
                cost_micros: 2_500,
                ..CostRecord::zero()
            },
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            cost: CostRecord::zero(),
        })
    }
}

pub fn target(spec: &SpecRef, partition: SuitePartition) -> TestTarget {
    let tree = match partition {
        SuitePartition::Visible => "tests_visible",
        SuitePartition::Hidden => "tests_hidden",
    };
    TestTarget::new(
        spec.clone(),
        partition,
        format!("{tree}/core/{}/{}", spec.name, spec.version),
    )
}

#[async_trait]
impl TestGenerator for FixedSuites {
    async fn prepare(&self, spec: &SpecRef) -> Result<GeneratedSuites, GenerationError> {
        if self.fail {
            return Err(GenerationError::Failed("generator crashed".into()));
        }
        Ok(GeneratedSuites {
            visible: target(spec, SuitePartition::Visible),
            hidden: target(spec, SuitePartition::Hidden),
            cost: self.cost,
        })
    }

    fn visible_target(&self, spec: &SpecRef) -> TestTarget {
        target(spec, SuitePartition::Visible)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunRecordStore for MemoryStore {
    async fn append(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.key() == record.key()) {
            return Err(StoreError::AlreadyExists(record.key()));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(
        &self,
        spec: &str,
        version: SpecVersion,
        run_id: &str,
    ) -> Result<Option<RunRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.spec == spec && r.version == version && r.run_id == run_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self.records())
    }
}

// ---------------------------------------------------------------------------
// Mutation intents
// ---------------------------------------------------------------------------

pub fn intent(id: &str, find: &str, replace: &str) -> MutationIntent {
    MutationIntent {
        id: id.into(),
        intent: format!("violate {id}"),
        severity: "high".into(),
        category: "policy".into(),
        clause: None,
        activation_probe: None,
        patch: MutationPatch {
            edits: vec![PatchEdit {
                find: find.into(),
                replace: replace.into(),
            }],
        },
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub fn driver_settings() -> DriverSettings {
    DriverSettings {
        iteration_timeout: Duration::from_secs(5),
        run_timeout: Duration::from_secs(30),
        evaluate_seed: true,
    }
}

pub fn mutation_settings() -> MutationSettings {
    MutationSettings {
        activation_attempts: 2,
        error_retries: 1,
        concurrency: 2,
        policy: TrialPolicy::Mean,
    }
}

pub fn pipeline_settings(max_iterations: u32, trials: u32) -> PipelineSettings {
    PipelineSettings {
        driver: driver_settings(),
        mutation: mutation_settings(),
        max_iterations,
        trials,
    }
}
