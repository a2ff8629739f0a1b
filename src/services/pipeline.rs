//! Sequential per-(spec, version) pipeline producing exactly one run record.
//!
//! init -> test_generation -> convergence -> hidden_evaluation -> mutation
//! -> regression. A stage that cannot run because an upstream stage failed is
//! recorded as skipped with the upstream reason; an abort marks every
//! remaining stage aborted. Whatever happens, the record is appended.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::errors::StoreError;
use crate::domain::models::{
    Artifact, ConvergenceResult, CostRecord, MutationPack, MutationReport, OracleRun, OracleVerdict,
    RunContext, RunRecord, SpecRef, Stage, StageOutcome, TerminalState, TestTarget,
};
use crate::domain::ports::{
    BehaviorProbe, GeneratedSuites, RunRecordStore, TestGenerator, TestOracle,
    TransformationAgent,
};
use crate::services::abort::AbortSignal;
use crate::services::convergence_driver::{ConvergenceDriver, DriverSettings};
use crate::services::metrics::{self, round_percent, PassRate};
use crate::services::mutation_engine::{MutationEngine, MutationSettings, SuiteReplayProbe};

/// Budgets applied to every pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub driver: DriverSettings,
    pub mutation: MutationSettings,
    pub max_iterations: u32,
    pub trials: u32,
}

/// One pipeline execution request.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub spec: SpecRef,
    pub seed: Artifact,
    /// `None` skips the mutation stage.
    pub mutation_pack: Option<MutationPack>,
}

/// The persisted record plus the detailed stage results behind it.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub record: RunRecord,
    pub convergence: Option<ConvergenceResult>,
    pub mutation: Option<MutationReport>,
}

/// Why the pipeline stopped before regression.
enum Halt {
    /// Downstream stages are skipped with this reason.
    Skip(String),
    Aborted,
}

type StageResult<T> = Result<T, Halt>;

pub struct EvaluationPipeline {
    generator: Arc<dyn TestGenerator>,
    oracle: Arc<dyn TestOracle>,
    agent: Arc<dyn TransformationAgent>,
    store: Arc<dyn RunRecordStore>,
    probe: Option<Arc<dyn BehaviorProbe>>,
    settings: PipelineSettings,
    abort: AbortSignal,
}

impl EvaluationPipeline {
    pub fn new(
        generator: Arc<dyn TestGenerator>,
        oracle: Arc<dyn TestOracle>,
        agent: Arc<dyn TransformationAgent>,
        store: Arc<dyn RunRecordStore>,
        settings: PipelineSettings,
        abort: AbortSignal,
    ) -> Self {
        Self {
            generator,
            oracle,
            agent,
            store,
            probe: None,
            settings,
            abort,
        }
    }

    /// Use `probe` for activation checks instead of replaying the visible suite.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn BehaviorProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Execute every stage and append the resulting record.
    ///
    /// Only a failure to persist the record is an error.
    #[tracing::instrument(skip_all, fields(spec = %request.spec))]
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineOutcome, StoreError> {
        let started = Instant::now();
        let mut ctx = RunContext::new(request.spec.clone());
        let mut run = StageRun {
            pipeline: self,
            ctx: &mut ctx,
            convergence: None,
            mutation: None,
        };

        match run.execute(&request).await {
            Ok(()) => {}
            Err(Halt::Skip(reason)) => {
                for stage in Stage::ALL {
                    if run.ctx.stage(stage).is_none() {
                        settle(run.ctx, stage, StageOutcome::skipped(reason.clone()));
                    }
                }
            }
            Err(Halt::Aborted) => run.ctx.abort("run aborted"),
        }

        let convergence = run.convergence.take();
        let mutation = run.mutation.take();
        let record = ctx.finish(started.elapsed());

        tracing::info!(
            run_id = %record.run_id,
            convergence = %record.stages.convergence,
            vpr = record.metrics.vpr_percent,
            hpr = record.metrics.hpr_percent,
            cost_usd = record.costs.total.total_cost_usd(),
            "pipeline finished"
        );
        self.store.append(&record).await?;

        Ok(PipelineOutcome {
            record,
            convergence,
            mutation,
        })
    }
}

fn settle(ctx: &mut RunContext, stage: Stage, outcome: StageOutcome) {
    if let Err(e) = ctx.record_stage(stage, outcome) {
        tracing::error!(error = %e, "stage outcome rejected");
    }
}

/// Mutable state of one pipeline execution.
struct StageRun<'a> {
    pipeline: &'a EvaluationPipeline,
    ctx: &'a mut RunContext,
    convergence: Option<ConvergenceResult>,
    mutation: Option<MutationReport>,
}

impl StageRun<'_> {
    async fn execute(&mut self, request: &PipelineRequest) -> StageResult<()> {
        self.init(request)?;
        let suites = self.test_generation(&request.spec).await?;
        let artifact = self
            .convergence(request.seed.clone(), &suites.visible)
            .await?;
        self.hidden_evaluation(&request.spec, &suites.hidden, &artifact)
            .await?;
        self.mutation(request, &suites.visible, &artifact).await?;
        self.regression(&request.spec, &artifact).await
    }

    fn check_abort(&self) -> StageResult<()> {
        if self.pipeline.abort.is_aborted() {
            return Err(Halt::Aborted);
        }
        Ok(())
    }

    fn init(&mut self, request: &PipelineRequest) -> StageResult<()> {
        self.check_abort()?;
        if request.seed.content().trim().is_empty() {
            let reason = "seed artifact is empty";
            settle(self.ctx, Stage::Init, StageOutcome::fail(reason));
            return Err(Halt::Skip(format!("init failed: {reason}")));
        }
        settle(self.ctx, Stage::Init, StageOutcome::pass());
        Ok(())
    }

    async fn test_generation(&mut self, spec: &SpecRef) -> StageResult<GeneratedSuites> {
        self.check_abort()?;
        let started = Instant::now();
        let prepared = tokio::select! {
            biased;
            () = self.pipeline.abort.aborted() => return Err(Halt::Aborted),
            prepared = self.pipeline.generator.prepare(spec) => prepared,
        };
        self.ctx.record_timing(Stage::TestGeneration, started.elapsed());

        match prepared {
            Ok(suites) => {
                self.record_cost(Stage::TestGeneration, suites.cost);
                settle(self.ctx, Stage::TestGeneration, StageOutcome::pass());
                Ok(suites)
            }
            Err(e) => {
                tracing::error!(error = %e, "test generation failed");
                settle(self.ctx, Stage::TestGeneration, StageOutcome::fail(e.to_string()));
                Err(Halt::Skip(format!("test generation failed: {e}")))
            }
        }
    }

    async fn convergence(&mut self, seed: Artifact, visible: &TestTarget) -> StageResult<Artifact> {
        self.check_abort()?;
        let p = self.pipeline;
        let driver = ConvergenceDriver::new(
            p.oracle.clone(),
            p.agent.clone(),
            p.settings.driver,
            p.abort.clone(),
        );
        let result = driver.run(seed, visible, p.settings.max_iterations).await;
        self.ctx.record_timing(Stage::Convergence, result.elapsed);
        self.record_cost(Stage::Convergence, result.total_cost + result.evaluation_cost);

        let (passed, total) = result.visible_counts();
        let (seed_passed, seed_total) = result.seed_counts();
        let rate = metrics::vpr(self.ctx.spec(), visible, passed, total);
        let m = self.ctx.metrics_mut();
        m.compiler_iterations = result.iterations;
        m.convergence_state = Some(result.terminal);
        m.seed_vpr_passed = seed_passed;
        m.seed_vpr_total = seed_total;

        let reason = result
            .reason
            .clone()
            .unwrap_or_else(|| result.terminal.to_string());
        let artifact = result.final_artifact.clone();
        let terminal = result.terminal;
        self.convergence = Some(result);

        let rate = match rate {
            Ok(rate) => rate,
            Err(_) if terminal == TerminalState::Aborted => return Err(Halt::Aborted),
            Err(e) => {
                tracing::error!(error = %e, "visible pass rate rejected");
                settle(self.ctx, Stage::Convergence, StageOutcome::fail(e.to_string()));
                return Err(Halt::Skip(format!("visible pass rate unavailable: {e}")));
            }
        };
        let m = self.ctx.metrics_mut();
        m.vpr_passed = rate.passed();
        m.vpr_total = rate.total();
        m.vpr_percent = round_percent(rate.percent());
        m.vpr_no_tests = rate.no_tests();

        match terminal {
            TerminalState::Converged => {
                settle(self.ctx, Stage::Convergence, StageOutcome::pass());
                Ok(artifact)
            }
            TerminalState::BudgetExhausted => {
                settle(self.ctx, Stage::Convergence, StageOutcome::fail(reason));
                Ok(artifact)
            }
            TerminalState::OracleUnavailable | TerminalState::AgentUnavailable => {
                settle(self.ctx, Stage::Convergence, StageOutcome::fail(reason.clone()));
                Err(Halt::Skip(format!("no compiled artifact: {reason}")))
            }
            TerminalState::Aborted => Err(Halt::Aborted),
        }
    }

    async fn hidden_evaluation(
        &mut self,
        spec: &SpecRef,
        hidden: &TestTarget,
        artifact: &Artifact,
    ) -> StageResult<()> {
        self.check_abort()?;
        let started = Instant::now();
        let run = self.run_oracle(hidden, artifact).await?;
        self.ctx.record_timing(Stage::HiddenEvaluation, started.elapsed());

        let outcome = match run {
            Ok(run) => {
                self.record_cost(Stage::HiddenEvaluation, run.cost);
                let (passed, total) = run.counts();
                match metrics::hpr(spec, hidden, passed, total) {
                    Ok(rate) => {
                        let m = self.ctx.metrics_mut();
                        m.hpr_passed = rate.passed();
                        m.hpr_total = rate.total();
                        m.hpr_percent = round_percent(rate.percent());
                        m.hpr_no_tests = rate.no_tests();
                        tracing::info!(hpr = %rate, "hidden suite evaluated");
                        StageOutcome::pass()
                    }
                    Err(e) => StageOutcome::fail(e.to_string()),
                }
            }
            Err(reason) => {
                self.ctx.metrics_mut().hpr_no_tests = true;
                StageOutcome::fail(reason)
            }
        };
        settle(self.ctx, Stage::HiddenEvaluation, outcome);
        Ok(())
    }

    async fn mutation(
        &mut self,
        request: &PipelineRequest,
        visible: &TestTarget,
        artifact: &Artifact,
    ) -> StageResult<()> {
        self.check_abort()?;
        let Some(pack) = &request.mutation_pack else {
            settle(self.ctx, Stage::Mutation, StageOutcome::skipped("no mutation pack"));
            return Ok(());
        };

        let p = self.pipeline;
        let probe: Arc<dyn BehaviorProbe> = match &p.probe {
            Some(probe) => probe.clone(),
            None => Arc::new(SuiteReplayProbe::new(p.oracle.clone(), visible.clone())),
        };
        let engine = MutationEngine::new(p.oracle.clone(), probe, p.settings.mutation);

        let started = Instant::now();
        let evaluated = tokio::select! {
            biased;
            () = p.abort.aborted() => return Err(Halt::Aborted),
            report = engine.evaluate_pack(&request.spec, artifact, pack, visible, p.settings.trials) => report,
        };
        self.ctx.record_timing(Stage::Mutation, started.elapsed());

        let outcome = match evaluated {
            Ok(report) => {
                let outcome = if report.is_complete() {
                    StageOutcome::pass()
                } else {
                    StageOutcome::fail("some mutants errored; verdicts incomplete")
                };
                let m = self.ctx.metrics_mut();
                if let Some(last) = report.last_trial() {
                    m.mutation_total = last.counts.total;
                    m.mutation_activated = last.counts.activated;
                    m.mutation_killed = last.counts.killed;
                    m.mutation_survived = last.counts.survived;
                    m.mutation_inconclusive = last.counts.non_activating;
                    m.mutation_inapplicable = last.counts.inapplicable;
                    m.mutation_errored = last.counts.errored;
                }
                m.mutation_score = report.aggregate.headline_score.percent().map(round_percent);
                m.mutation_trials = report.aggregate.trials;
                self.mutation = Some(report);
                outcome
            }
            Err(e) => StageOutcome::fail(format!("reference not observable: {e}")),
        };
        settle(self.ctx, Stage::Mutation, outcome);
        Ok(())
    }

    async fn regression(&mut self, spec: &SpecRef, artifact: &Artifact) -> StageResult<()> {
        self.check_abort()?;
        let Some(prior) = spec.previous() else {
            settle(
                self.ctx,
                Stage::Regression,
                StageOutcome::skipped("no prior specification version"),
            );
            return Ok(());
        };

        let prior_suite = self.pipeline.generator.visible_target(&prior);
        let started = Instant::now();
        let run = self.run_oracle(&prior_suite, artifact).await?;
        self.ctx.record_timing(Stage::Regression, started.elapsed());

        let outcome = match run {
            Ok(run) => {
                self.record_cost(Stage::Regression, run.cost);
                let (passed, total) = run.counts();
                match metrics::surs(spec, &prior_suite, passed, total) {
                    Ok(rate) => {
                        write_surs(self.ctx, rate);
                        tracing::info!(surs = %rate, "regression suite evaluated");
                        StageOutcome::pass()
                    }
                    Err(e) => StageOutcome::fail(e.to_string()),
                }
            }
            Err(reason) => {
                self.ctx.metrics_mut().surs_no_tests = true;
                StageOutcome::fail(reason)
            }
        };
        settle(self.ctx, Stage::Regression, outcome);
        Ok(())
    }

    /// Run the oracle once, racing the abort signal. The inner `Err` carries
    /// the reason the oracle produced no usable verdict.
    async fn run_oracle(
        &self,
        target: &TestTarget,
        artifact: &Artifact,
    ) -> StageResult<Result<OracleRun, String>> {
        let p = self.pipeline;
        let run = tokio::select! {
            biased;
            () = p.abort.aborted() => return Err(Halt::Aborted),
            run = p.oracle.run(target, artifact) => run,
        };
        Ok(match run {
            Ok(run) => match run.verdict() {
                OracleVerdict::InfrastructureFailure { reason } => Err(reason),
                _ => Ok(run),
            },
            Err(e) => Err(e.to_string()),
        })
    }

    fn record_cost(&mut self, stage: Stage, cost: CostRecord) {
        if let Err(e) = self.ctx.record_cost(stage, cost) {
            tracing::error!(error = %e, "stage cost rejected");
        }
    }
}

fn write_surs(ctx: &mut RunContext, rate: PassRate) {
    let m = ctx.metrics_mut();
    m.surs_passed = rate.passed();
    m.surs_total = rate.total();
    m.surs_percent = round_percent(rate.percent());
    m.surs_no_tests = rate.no_tests();
}
