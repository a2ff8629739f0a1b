//! End-to-end pipeline runs against in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    costed_run, intent, marker_run, pipeline_settings, pytest_run, ramp, setup_test_logging,
    spec, target, AppendingAgent, FixedSuites, MemoryStore, ScriptedOracle,
};
use tdad::domain::errors::{GenerationError, OracleError};
use tdad::domain::models::{
    Artifact, CostRecord, MutationPack, SpecRef, SpecVersion, Stage, StageStatus,
    SuitePartition, TerminalState, TestTarget,
};
use tdad::domain::ports::{
    GeneratedSuites, RunRecordStore, TestGenerator, TestOracle, TransformationAgent,
};
use tdad::services::metrics::format_percent;
use tdad::services::{
    AbortHandle, AbortSignal, EvaluationPipeline, PipelineRequest, PipelineSettings,
};

fn pipeline(
    generator: Arc<dyn TestGenerator>,
    oracle: Arc<dyn TestOracle>,
    agent: Arc<dyn TransformationAgent>,
    store: Arc<dyn RunRecordStore>,
    settings: PipelineSettings,
    abort: AbortSignal,
) -> EvaluationPipeline {
    EvaluationPipeline::new(generator, oracle, agent, store, settings, abort)
}

fn request(version: SpecVersion, pack: Option<MutationPack>) -> PipelineRequest {
    PipelineRequest {
        spec: spec("supportops", version),
        seed: Artifact::seed("You are a support agent. Verify identity before refunds."),
        mutation_pack: pack,
    }
}

#[tokio::test]
async fn converges_then_scores_hidden_suite() {
    setup_test_logging();
    // 15 visible tests, four more pass per revision: full pass at iteration 4.
    let oracle = ScriptedOracle::new(|target, artifact| {
        Ok(match target.partition {
            SuitePartition::Visible => ramp(15, 4, artifact.revision()),
            SuitePartition::Hidden => pytest_run(17, 3),
        })
    });
    let agent = AppendingAgent::new();
    let store = MemoryStore::new();

    let outcome = pipeline(
        FixedSuites::ok(),
        oracle,
        agent.clone(),
        store.clone(),
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V1, None))
    .await
    .unwrap();

    let record = &outcome.record;
    assert_eq!(record.metrics.convergence_state, Some(TerminalState::Converged));
    assert_eq!(record.metrics.compiler_iterations, 4);
    assert_eq!(agent.calls(), 4);
    assert_eq!(record.metrics.seed_vpr_passed, 0);
    assert_eq!(record.metrics.seed_vpr_total, 15);

    assert_eq!(record.metrics.vpr_passed, 15);
    assert_eq!(record.metrics.vpr_total, 15);
    assert!((record.metrics.vpr_percent - 100.0).abs() < f64::EPSILON);

    assert_eq!(record.metrics.hpr_passed, 17);
    assert_eq!(record.metrics.hpr_total, 20);
    assert!((record.metrics.hpr_percent - 85.0).abs() < f64::EPSILON);

    assert_eq!(record.stages.init, StageStatus::Pass);
    assert_eq!(record.stages.test_generation, StageStatus::Pass);
    assert_eq!(record.stages.convergence, StageStatus::Pass);
    assert_eq!(record.stages.hidden_evaluation, StageStatus::Pass);
    assert_eq!(record.stages.mutation, StageStatus::Skipped);
    assert_eq!(record.stages.regression, StageStatus::Skipped);
    assert_eq!(
        record.stage_reasons.get(&Stage::Regression).map(String::as_str),
        Some("no prior specification version")
    );

    let convergence = outcome.convergence.unwrap();
    assert_eq!(convergence.history.len(), 4);
    assert_eq!(convergence.final_artifact.revision(), 4);

    let persisted = store.records();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0], outcome.record);
}

#[tokio::test]
async fn budget_exhaustion_still_scores_hidden_suite() {
    let oracle = ScriptedOracle::new(|target, artifact| {
        Ok(match target.partition {
            SuitePartition::Visible => ramp(15, 1, artifact.revision()),
            SuitePartition::Hidden => pytest_run(10, 10),
        })
    });
    let store = MemoryStore::new();

    let outcome = pipeline(
        FixedSuites::ok(),
        oracle,
        AppendingAgent::new(),
        store.clone(),
        pipeline_settings(3, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V1, None))
    .await
    .unwrap();

    let record = &outcome.record;
    assert_eq!(
        record.metrics.convergence_state,
        Some(TerminalState::BudgetExhausted)
    );
    assert_eq!(record.metrics.compiler_iterations, 3);
    assert_eq!(record.stages.convergence, StageStatus::Fail);
    assert_eq!(record.metrics.vpr_passed, 3);
    assert_eq!(record.metrics.vpr_total, 15);
    assert!((record.metrics.vpr_percent - 20.0).abs() < f64::EPSILON);
    assert_eq!(record.stages.hidden_evaluation, StageStatus::Pass);
    assert!((record.metrics.hpr_percent - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn oracle_unavailable_skips_downstream_stages() {
    let oracle = ScriptedOracle::new(|_, _| Err(OracleError::Spawn("pytest: not found".into())));
    let agent = AppendingAgent::new();
    let store = MemoryStore::new();

    let outcome = pipeline(
        FixedSuites::ok(),
        oracle,
        agent.clone(),
        store.clone(),
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V2, None))
    .await
    .unwrap();

    let record = &outcome.record;
    assert_eq!(
        record.metrics.convergence_state,
        Some(TerminalState::OracleUnavailable)
    );
    assert_eq!(agent.calls(), 0);
    assert_eq!(record.metrics.compiler_iterations, 0);
    assert_eq!(record.metrics.vpr_passed, 0);
    assert_eq!(record.metrics.vpr_total, 0);
    assert!(record.metrics.vpr_no_tests);

    assert_eq!(record.stages.convergence, StageStatus::Fail);
    for stage in [Stage::HiddenEvaluation, Stage::Mutation, Stage::Regression] {
        assert_eq!(record.stages.get(stage), StageStatus::Skipped, "{stage:?}");
        assert!(record.stage_reasons[&stage].starts_with("no compiled artifact"));
    }
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn regression_scores_prior_visible_suite() {
    let oracle = ScriptedOracle::new(|target, _| {
        Ok(match (target.spec.version, target.partition) {
            (SpecVersion::V1, SuitePartition::Visible) => pytest_run(13, 2),
            (_, SuitePartition::Visible) => pytest_run(15, 0),
            (_, SuitePartition::Hidden) => pytest_run(20, 0),
        })
    });
    let store = MemoryStore::new();

    let outcome = pipeline(
        FixedSuites::ok(),
        oracle,
        AppendingAgent::new(),
        store,
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V2, None))
    .await
    .unwrap();

    let record = &outcome.record;
    // The seed already passes; no agent turns are spent.
    assert_eq!(record.metrics.convergence_state, Some(TerminalState::Converged));
    assert_eq!(record.metrics.compiler_iterations, 0);

    assert_eq!(record.stages.regression, StageStatus::Pass);
    assert_eq!(record.metrics.surs_passed, 13);
    assert_eq!(record.metrics.surs_total, 15);
    assert!((record.metrics.surs_percent - 86.67).abs() < 1e-9);
    assert_eq!(format_percent(record.metrics.surs_percent, 1), "86.7");
}

#[tokio::test]
async fn generation_failure_produces_partial_record() {
    let oracle = ScriptedOracle::new(|_, _| Ok(pytest_run(1, 0)));
    let store = MemoryStore::new();

    let outcome = pipeline(
        FixedSuites::failing(),
        oracle.clone(),
        AppendingAgent::new(),
        store.clone(),
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V1, None))
    .await
    .unwrap();

    let record = &outcome.record;
    assert_eq!(record.stages.init, StageStatus::Pass);
    assert_eq!(record.stages.test_generation, StageStatus::Fail);
    for stage in [
        Stage::Convergence,
        Stage::HiddenEvaluation,
        Stage::Mutation,
        Stage::Regression,
    ] {
        assert_eq!(record.stages.get(stage), StageStatus::Skipped, "{stage:?}");
    }
    assert!(outcome.convergence.is_none());
    assert_eq!(oracle.calls(), 0);
    assert_eq!(store.records().len(), 1);
}

/// Hands out the hidden suite where the visible one belongs.
struct SwappedSuites;

#[async_trait]
impl TestGenerator for SwappedSuites {
    async fn prepare(&self, spec: &SpecRef) -> Result<GeneratedSuites, GenerationError> {
        Ok(GeneratedSuites {
            visible: target(spec, SuitePartition::Hidden),
            hidden: target(spec, SuitePartition::Hidden),
            cost: CostRecord::zero(),
        })
    }

    fn visible_target(&self, spec: &SpecRef) -> TestTarget {
        target(spec, SuitePartition::Hidden)
    }
}

#[tokio::test]
async fn rejected_visible_pass_rate_fails_convergence() {
    let store = MemoryStore::new();
    let outcome = pipeline(
        Arc::new(SwappedSuites),
        ScriptedOracle::new(|_, _| Ok(pytest_run(5, 0))),
        AppendingAgent::new(),
        store.clone(),
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V1, None))
    .await
    .unwrap();

    let record = &outcome.record;
    assert_eq!(record.stages.convergence, StageStatus::Fail);
    let reason = &record.stage_reasons[&Stage::Convergence];
    assert!(reason.starts_with("VPR requires"), "{reason}");
    assert!(reason.ends_with("hidden"), "{reason}");
    assert_eq!(record.metrics.convergence_state, Some(TerminalState::Converged));
    // Counts from the wrong suite are never reported as the visible pass rate.
    assert_eq!(record.metrics.vpr_passed, 0);
    assert_eq!(record.metrics.vpr_total, 0);
    for stage in [Stage::HiddenEvaluation, Stage::Mutation, Stage::Regression] {
        assert_eq!(record.stages.get(stage), StageStatus::Skipped, "{stage:?}");
        assert!(record.stage_reasons[&stage].starts_with("visible pass rate unavailable"));
    }
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn empty_seed_fails_init() {
    let store = MemoryStore::new();
    let outcome = pipeline(
        FixedSuites::ok(),
        ScriptedOracle::new(|_, _| Ok(pytest_run(1, 0))),
        AppendingAgent::new(),
        store.clone(),
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(PipelineRequest {
        spec: spec("supportops", SpecVersion::V1),
        seed: Artifact::seed("   \n"),
        mutation_pack: None,
    })
    .await
    .unwrap();

    assert_eq!(outcome.record.stages.init, StageStatus::Fail);
    assert_eq!(outcome.record.stages.test_generation, StageStatus::Skipped);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn abort_before_start_marks_every_stage_aborted() {
    let (handle, signal) = AbortHandle::new();
    handle.abort();
    let store = MemoryStore::new();

    let outcome = pipeline(
        FixedSuites::ok(),
        ScriptedOracle::new(|_, _| Ok(pytest_run(1, 0))),
        AppendingAgent::new(),
        store.clone(),
        pipeline_settings(8, 1),
        signal,
    )
    .run(request(SpecVersion::V1, None))
    .await
    .unwrap();

    for stage in Stage::ALL {
        assert_eq!(
            outcome.record.stages.get(stage),
            StageStatus::Aborted,
            "{stage:?}"
        );
    }
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn abort_during_convergence_persists_once() {
    setup_test_logging();
    let (handle, signal) = AbortHandle::new();
    let oracle = ScriptedOracle::new(|target, artifact| {
        Ok(match target.partition {
            SuitePartition::Visible => ramp(15, 1, artifact.revision()),
            SuitePartition::Hidden => pytest_run(20, 0),
        })
    });
    let agent = AppendingAgent::with_delay(Duration::from_millis(50));
    let store = MemoryStore::new();

    let pipeline = pipeline(
        FixedSuites::ok(),
        oracle,
        agent.clone(),
        store.clone(),
        pipeline_settings(100, 1),
        signal,
    );
    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();
    });

    let outcome = pipeline.run(request(SpecVersion::V1, None)).await.unwrap();
    aborter.await.unwrap();

    let record = &outcome.record;
    assert_eq!(record.stages.init, StageStatus::Pass);
    assert_eq!(record.stages.test_generation, StageStatus::Pass);
    assert_eq!(record.stages.convergence, StageStatus::Aborted);
    assert_eq!(record.stages.hidden_evaluation, StageStatus::Aborted);
    assert_eq!(record.stages.regression, StageStatus::Aborted);
    assert_eq!(record.metrics.convergence_state, Some(TerminalState::Aborted));
    assert!(agent.calls() < 100);

    let persisted = store.records();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].run_id, record.run_id);
}

#[tokio::test]
async fn cost_total_is_exact_sum_of_stages() {
    let oracle = ScriptedOracle::new(|target, artifact| {
        Ok(match (target.spec.version, target.partition) {
            (SpecVersion::V1, SuitePartition::Visible) => costed_run(9, 1, 700),
            (_, SuitePartition::Visible) => {
                let run = ramp(6, 3, artifact.revision());
                let (passed, total) = run.counts();
                costed_run(passed, total - passed, 1_001)
            }
            (_, SuitePartition::Hidden) => costed_run(8, 2, 333),
        })
    });
    let agent = AppendingAgent::new();
    let generator = FixedSuites::ok();

    let outcome = pipeline(
        generator.clone(),
        oracle,
        agent.clone(),
        MemoryStore::new(),
        pipeline_settings(8, 1),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V2, None))
    .await
    .unwrap();

    let costs = outcome.record.costs;
    assert_eq!(outcome.record.metrics.compiler_iterations, 2);
    assert_eq!(costs.test_generation, generator.cost);
    // Two agent turns plus seed and two iteration evaluations.
    assert_eq!(costs.convergence.cost_micros, 2 * 12_345 + 3 * 1_001);
    assert_eq!(costs.hidden_evaluation.cost_micros, 333);
    assert_eq!(costs.regression.cost_micros, 700);
    assert_eq!(
        costs.total,
        costs.test_generation
            + costs.convergence
            + costs.hidden_evaluation
            + costs.mutation
            + costs.regression
    );
    assert_eq!(
        costs.total.cost_micros,
        2_500 + 2 * 12_345 + 3 * 1_001 + 333 + 700
    );
    assert_eq!(
        costs.total.output_tokens,
        generator.cost.output_tokens + 2 * agent.cost.output_tokens + 5 * 10
    );
}

#[tokio::test]
async fn mutation_stage_scores_converged_artifact() {
    let oracle = ScriptedOracle::new(|target, artifact| {
        Ok(match target.partition {
            SuitePartition::Visible => marker_run(10, artifact),
            SuitePartition::Hidden => pytest_run(5, 0),
        })
    });
    let pack = MutationPack {
        mutation_pack_id: Some("supportops_v1_pack".into()),
        mutations: vec![
            intent("skip_identity", "Verify identity", "BUG:test_identity Skip identity"),
            intent("skip_refunds", "before refunds.", "BUG:test_refunds whenever."),
            intent("reword", "You are", "You're"),
            intent("missing", "escalate to a human", "ignore"),
        ],
    };

    let outcome = pipeline(
        FixedSuites::ok(),
        oracle,
        AppendingAgent::new(),
        MemoryStore::new(),
        pipeline_settings(8, 2),
        AbortSignal::never(),
    )
    .run(request(SpecVersion::V1, Some(pack)))
    .await
    .unwrap();

    let record = &outcome.record;
    assert_eq!(record.stages.mutation, StageStatus::Pass);
    assert_eq!(record.metrics.mutation_total, 3);
    assert_eq!(record.metrics.mutation_activated, 2);
    assert_eq!(record.metrics.mutation_killed, 2);
    assert_eq!(record.metrics.mutation_survived, 0);
    assert_eq!(record.metrics.mutation_inconclusive, 1);
    assert_eq!(record.metrics.mutation_inapplicable, 1);
    assert_eq!(record.metrics.mutation_trials, 2);
    assert_eq!(record.metrics.mutation_score, Some(100.0));

    let report = outcome.mutation.unwrap();
    assert_eq!(report.mutation_pack_id.as_deref(), Some("supportops_v1_pack"));
    assert_eq!(report.trials.len(), 2);
}
