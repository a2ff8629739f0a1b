//! Bounded refinement loop: agent revises, oracle judges, repeat until pass.
//!
//! Each collaborator call runs under both the per-iteration timeout and the
//! remaining run budget, raced against the abort signal. The loop itself is
//! driven by [`DriverState`] transitions so every exit path is a named
//! terminal state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};

use crate::domain::models::{
    Artifact, ConvergenceConfig, ConvergenceResult, CostRecord, DriverEvent, DriverState,
    IterationRecord, OracleFeedback, OracleRun, OracleVerdict, TerminalState, TestSummary,
    TestTarget,
};
use crate::domain::ports::{AgentRequest, TestOracle, TransformationAgent};
use crate::services::abort::AbortSignal;
use crate::services::summary_parser::extract_failure_feedback;

/// Budgets for one convergence run.
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub iteration_timeout: Duration,
    pub run_timeout: Duration,
    pub evaluate_seed: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from(&ConvergenceConfig::default())
    }
}

impl From<&ConvergenceConfig> for DriverSettings {
    fn from(config: &ConvergenceConfig) -> Self {
        Self {
            iteration_timeout: config.iteration_timeout(),
            run_timeout: config.run_timeout(),
            evaluate_seed: config.evaluate_seed,
        }
    }
}

/// Why a guarded collaborator call did not complete.
#[derive(Debug)]
enum Interrupted {
    TimedOut(Duration),
    RunDeadline,
    Cancelled,
}

/// Loop bookkeeping that outlives individual iterations.
struct Progress {
    state: DriverState,
    artifact: Artifact,
    feedback: Option<OracleFeedback>,
    history: Vec<IterationRecord>,
    agent_cost: CostRecord,
    evaluation_cost: CostRecord,
    final_summary: Option<TestSummary>,
    seed_summary: Option<TestSummary>,
    reason: Option<String>,
}

impl Progress {
    fn stop(&mut self, event: DriverEvent, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(event = ?event, %reason, "convergence stopping");
        self.state = self.state.on(event);
        self.reason = Some(reason);
    }

    fn interrupt(&mut self, interrupted: Interrupted, on_timeout: DriverEvent, what: &str) {
        match interrupted {
            Interrupted::TimedOut(limit) => {
                self.stop(on_timeout, format!("{what} timed out after {limit:?}"));
            }
            Interrupted::RunDeadline => {
                self.stop(DriverEvent::RunDeadline, "run wall-clock budget exhausted");
            }
            Interrupted::Cancelled => self.stop(DriverEvent::Cancelled, "run aborted"),
        }
    }
}

/// Drives an artifact toward a full pass of the visible suite.
pub struct ConvergenceDriver {
    oracle: Arc<dyn TestOracle>,
    agent: Arc<dyn TransformationAgent>,
    settings: DriverSettings,
    abort: AbortSignal,
}

impl ConvergenceDriver {
    pub fn new(
        oracle: Arc<dyn TestOracle>,
        agent: Arc<dyn TransformationAgent>,
        settings: DriverSettings,
        abort: AbortSignal,
    ) -> Self {
        Self {
            oracle,
            agent,
            settings,
            abort,
        }
    }

    /// Run the loop to a terminal state. Never performs more than
    /// `max_iterations` agent invocations.
    #[tracing::instrument(skip_all, fields(spec = %target.spec, max_iterations = max_iterations))]
    pub async fn run(
        &self,
        seed: Artifact,
        target: &TestTarget,
        max_iterations: u32,
    ) -> ConvergenceResult {
        let started = Instant::now();
        let deadline = started + self.settings.run_timeout;

        let mut progress = Progress {
            state: DriverState::Idle.on(DriverEvent::Start),
            artifact: seed,
            feedback: None,
            history: Vec::new(),
            agent_cost: CostRecord::zero(),
            evaluation_cost: CostRecord::zero(),
            final_summary: None,
            seed_summary: None,
            reason: None,
        };

        if self.abort.is_aborted() {
            progress.stop(DriverEvent::Cancelled, "run aborted before start");
        } else if self.settings.evaluate_seed {
            self.evaluate_seed(&mut progress, target, deadline).await;
        }

        while let DriverState::Iterating { iteration } = progress.state {
            if iteration >= max_iterations {
                progress.stop(
                    DriverEvent::BudgetSpent,
                    format!("no full pass within {max_iterations} iterations"),
                );
                break;
            }
            if self.abort.is_aborted() {
                progress.stop(DriverEvent::Cancelled, "run aborted");
                break;
            }
            self.iterate(&mut progress, target, iteration + 1, max_iterations, deadline)
                .await;
        }

        let terminal = progress.state.terminal().unwrap_or(TerminalState::Aborted);
        let result = ConvergenceResult {
            terminal,
            iterations: u32::try_from(progress.history.len()).unwrap_or(u32::MAX),
            max_iterations,
            final_artifact: progress.artifact,
            final_summary: progress.final_summary,
            seed_summary: progress.seed_summary,
            history: progress.history,
            total_cost: progress.agent_cost,
            evaluation_cost: progress.evaluation_cost,
            elapsed: started.elapsed(),
            reason: progress.reason,
        };

        let (passed, total) = result.visible_counts();
        tracing::info!(
            terminal = %result.terminal,
            iterations = result.iterations,
            passed,
            total,
            cost = %result.total_cost.format_summary(),
            "convergence finished"
        );
        result
    }

    async fn evaluate_seed(&self, progress: &mut Progress, target: &TestTarget, deadline: Instant) {
        let run = match self.guarded(deadline, self.oracle.run(target, &progress.artifact)).await {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => return progress.stop(DriverEvent::OracleFailed, e.to_string()),
            Err(i) => return progress.interrupt(i, DriverEvent::OracleFailed, "seed evaluation"),
        };
        progress.evaluation_cost += run.cost;

        match run.verdict() {
            OracleVerdict::InfrastructureFailure { reason } => {
                progress.stop(DriverEvent::OracleFailed, reason);
            }
            verdict => {
                tracing::info!(
                    passed = run.counts().0,
                    total = run.counts().1,
                    "seed artifact evaluated"
                );
                progress.seed_summary = run.summary;
                progress.final_summary = run.summary;
                if verdict == OracleVerdict::AllPassed {
                    progress.state = progress.state.on(DriverEvent::SeedAccepted);
                } else {
                    progress.feedback = Some(feedback_from(&run));
                }
            }
        }
    }

    async fn iterate(
        &self,
        progress: &mut Progress,
        target: &TestTarget,
        iteration: u32,
        max_iterations: u32,
        deadline: Instant,
    ) {
        let request = AgentRequest {
            spec: target.spec.clone(),
            iteration,
            max_iterations,
            artifact: progress.artifact.clone(),
            feedback: progress.feedback.take(),
        };

        let agent_started = Instant::now();
        let turn = match self.guarded(deadline, self.agent.revise(request)).await {
            Ok(Ok(turn)) => turn,
            Ok(Err(e)) => {
                progress.agent_cost += e.cost();
                return progress.stop(DriverEvent::AgentFailed, e.to_string());
            }
            Err(i) => return progress.interrupt(i, DriverEvent::AgentFailed, "agent"),
        };
        let agent_elapsed = agent_started.elapsed();
        tracing::debug!(iteration, transcript_len = turn.transcript.len(), "agent returned");

        // The agent's cost is attributed before anything else in the iteration.
        progress.agent_cost += turn.cost;
        progress.artifact = turn.artifact;

        let oracle_started = Instant::now();
        let outcome = self
            .guarded(deadline, self.oracle.run(target, &progress.artifact))
            .await;
        let oracle_elapsed = oracle_started.elapsed();

        let mut record = IterationRecord {
            iteration,
            artifact_revision: progress.artifact.revision(),
            passed: 0,
            failed: 0,
            total: 0,
            failing_tests: Vec::new(),
            cost: turn.cost,
            agent_elapsed_ms: millis(agent_elapsed),
            oracle_elapsed_ms: millis(oracle_elapsed),
        };

        let run = match outcome {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => {
                progress.history.push(record);
                return progress.stop(DriverEvent::OracleFailed, e.to_string());
            }
            Err(i) => {
                progress.history.push(record);
                return progress.interrupt(i, DriverEvent::OracleFailed, "oracle");
            }
        };
        progress.evaluation_cost += run.cost;

        let verdict = run.verdict();
        if let OracleVerdict::InfrastructureFailure { reason } = verdict {
            progress.history.push(record);
            return progress.stop(DriverEvent::OracleFailed, reason);
        }

        let summary = run.summary.unwrap_or_default();
        record.passed = summary.passed;
        record.failed = summary.failed;
        record.total = summary.total();
        record.failing_tests.clone_from(&run.failing_tests);
        progress.history.push(record);
        progress.final_summary = run.summary;

        let all_passed = verdict == OracleVerdict::AllPassed;
        tracing::info!(
            iteration,
            passed = summary.passed,
            total = summary.total(),
            all_passed,
            "iteration complete"
        );
        if !all_passed {
            progress.feedback = Some(feedback_from(&run));
        }
        progress.state = progress
            .state
            .on(DriverEvent::IterationCompleted { all_passed });
    }

    /// Await `fut` under the iteration timeout, the run deadline and the abort
    /// signal, whichever comes first.
    async fn guarded<F: Future>(
        &self,
        deadline: Instant,
        fut: F,
    ) -> Result<F::Output, Interrupted> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Interrupted::RunDeadline);
        }
        let remaining = deadline - now;
        let (limit, on_expiry) = if self.settings.iteration_timeout <= remaining {
            let limit = self.settings.iteration_timeout;
            (limit, Interrupted::TimedOut(limit))
        } else {
            (remaining, Interrupted::RunDeadline)
        };

        tokio::select! {
            biased;
            () = self.abort.aborted() => Err(Interrupted::Cancelled),
            out = timeout(limit, fut) => out.map_err(|_| on_expiry),
        }
    }
}

fn feedback_from(run: &OracleRun) -> OracleFeedback {
    OracleFeedback {
        failing_tests: run.failing_tests.clone(),
        excerpt: extract_failure_feedback(&run.output),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{AgentError, OracleError};
    use crate::domain::models::{SpecRef, SpecVersion, SuitePartition};
    use crate::domain::ports::AgentTurn;
    use crate::services::abort::AbortHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Passes `revision * step` tests out of `total`.
    struct RevisionOracle {
        total: u32,
        step: u32,
    }

    #[async_trait]
    impl TestOracle for RevisionOracle {
        async fn run(&self, _: &TestTarget, artifact: &Artifact) -> Result<OracleRun, OracleError> {
            let passed = (artifact.revision() * self.step).min(self.total);
            let failed = self.total - passed;
            Ok(OracleRun {
                exit_code: Some(i32::from(failed > 0)),
                summary: Some(TestSummary::new(passed, failed)),
                failing_tests: (0..failed).map(|i| format!("t.py::test_{i}")).collect(),
                output: format!("{failed} failed, {passed} passed in 0.1s"),
                ..OracleRun::default()
            })
        }
    }

    struct CountingAgent {
        calls: AtomicU32,
        delay: Duration,
        fail: bool,
    }

    impl CountingAgent {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl TransformationAgent for CountingAgent {
        async fn revise(&self, request: AgentRequest) -> Result<AgentTurn, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(AgentError::Failed {
                    code: Some(2),
                    stderr: "auth".into(),
                    cost: CostRecord {
                        input_tokens: 300,
                        cost_micros: 7_000,
                        ..CostRecord::zero()
                    },
                });
            }
            let content = format!("{} +{}", request.artifact.content(), request.iteration);
            Ok(AgentTurn {
                artifact: request.artifact.revise(content),
                cost: CostRecord {
                    output_tokens: 100,
                    cost_micros: 10_000,
                    ..CostRecord::zero()
                },
                transcript: String::new(),
            })
        }
    }

    fn target() -> TestTarget {
        TestTarget::new(
            SpecRef::new("supportops", SpecVersion::V1),
            SuitePartition::Visible,
            "tests_visible/core/supportops/v1",
        )
    }

    fn settings() -> DriverSettings {
        DriverSettings {
            iteration_timeout: Duration::from_secs(5),
            run_timeout: Duration::from_secs(30),
            evaluate_seed: true,
        }
    }

    fn driver(
        oracle: RevisionOracle,
        agent: Arc<CountingAgent>,
        settings: DriverSettings,
        abort: AbortSignal,
    ) -> ConvergenceDriver {
        ConvergenceDriver::new(Arc::new(oracle), agent, settings, abort)
    }

    #[tokio::test]
    async fn halts_on_first_full_pass() {
        let agent = Arc::new(CountingAgent::new());
        let d = driver(
            RevisionOracle { total: 10, step: 4 },
            agent.clone(),
            settings(),
            AbortSignal::never(),
        );
        let result = d.run(Artifact::seed("seed"), &target(), 8).await;

        assert_eq!(result.terminal, TerminalState::Converged);
        assert_eq!(result.iterations, 3);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.visible_counts(), (10, 10));
        assert_eq!(result.seed_counts(), (0, 10));
        assert_eq!(result.total_cost.cost_micros, 30_000);
        assert_eq!(result.final_artifact.revision(), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_keeps_last_revision() {
        let agent = Arc::new(CountingAgent::new());
        let d = driver(
            RevisionOracle { total: 20, step: 1 },
            agent.clone(),
            settings(),
            AbortSignal::never(),
        );
        let result = d.run(Artifact::seed("seed"), &target(), 5).await;

        assert_eq!(result.terminal, TerminalState::BudgetExhausted);
        assert_eq!(result.iterations, 5);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 5);
        assert_eq!(result.final_artifact.revision(), 5);
        assert_eq!(result.visible_counts(), (5, 20));
        let summed: CostRecord = result.history.iter().map(|r| r.cost).sum();
        assert_eq!(summed, result.total_cost);
    }

    #[tokio::test]
    async fn passing_seed_needs_no_iterations() {
        let agent = Arc::new(CountingAgent::new());
        let d = driver(
            RevisionOracle { total: 0, step: 0 },
            agent.clone(),
            settings(),
            AbortSignal::never(),
        );
        // Zero tests is an infrastructure failure, not a pass.
        let result = d.run(Artifact::seed("seed"), &target(), 3).await;
        assert_eq!(result.terminal, TerminalState::OracleUnavailable);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.visible_counts(), (0, 0));

        let d = driver(
            RevisionOracle { total: 4, step: 4 },
            agent.clone(),
            settings(),
            AbortSignal::never(),
        );
        let result = d.run(Artifact::seed("seed").revise("good"), &target(), 3).await;
        assert_eq!(result.terminal, TerminalState::Converged);
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn agent_failure_is_its_own_terminal_state() {
        let agent = Arc::new(CountingAgent {
            fail: true,
            ..CountingAgent::new()
        });
        let d = driver(
            RevisionOracle { total: 10, step: 1 },
            agent,
            settings(),
            AbortSignal::never(),
        );
        let result = d.run(Artifact::seed("seed"), &target(), 3).await;
        assert_eq!(result.terminal, TerminalState::AgentUnavailable);
        assert_eq!(result.iterations, 0);
        assert!(result.reason.unwrap().contains("auth"));
        // The failed turn's reported usage is still counted.
        assert_eq!(result.total_cost.cost_micros, 7_000);
        assert_eq!(result.total_cost.input_tokens, 300);
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let agent = Arc::new(CountingAgent {
            delay: Duration::from_secs(10),
            ..CountingAgent::new()
        });
        let d = driver(
            RevisionOracle { total: 10, step: 1 },
            agent,
            DriverSettings {
                iteration_timeout: Duration::from_millis(50),
                ..settings()
            },
            AbortSignal::never(),
        );
        let result = d.run(Artifact::seed("seed"), &target(), 3).await;
        assert_eq!(result.terminal, TerminalState::AgentUnavailable);
    }

    #[tokio::test]
    async fn run_deadline_exhausts_budget() {
        let agent = Arc::new(CountingAgent {
            delay: Duration::from_secs(10),
            ..CountingAgent::new()
        });
        let d = driver(
            RevisionOracle { total: 10, step: 1 },
            agent,
            DriverSettings {
                iteration_timeout: Duration::from_secs(60),
                run_timeout: Duration::from_millis(50),
                evaluate_seed: false,
            },
            AbortSignal::never(),
        );
        let result = d.run(Artifact::seed("seed"), &target(), 3).await;
        assert_eq!(result.terminal, TerminalState::BudgetExhausted);
    }

    #[tokio::test]
    async fn abort_interrupts_in_flight_call() {
        let agent = Arc::new(CountingAgent {
            delay: Duration::from_secs(10),
            ..CountingAgent::new()
        });
        let (handle, signal) = AbortHandle::new();
        let d = driver(RevisionOracle { total: 10, step: 1 }, agent, settings(), signal);

        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.abort();
            handle
        });
        let result = d.run(Artifact::seed("seed"), &target(), 3).await;
        let _handle = aborter.await.unwrap();
        assert_eq!(result.terminal, TerminalState::Aborted);
    }

    #[tokio::test]
    async fn already_aborted_runs_nothing() {
        let agent = Arc::new(CountingAgent::new());
        let (handle, signal) = AbortHandle::new();
        handle.abort();
        let d = driver(RevisionOracle { total: 10, step: 5 }, agent.clone(), settings(), signal);
        let result = d.run(Artifact::seed("seed"), &target(), 3).await;
        assert_eq!(result.terminal, TerminalState::Aborted);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    }
}
