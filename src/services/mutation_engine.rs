//! Mutation testing: how well does a suite detect deliberate deviations?
//!
//! Each intent is patched into a private copy of the reference, checked for
//! activation against a behavioral probe, and (if activated) run against the
//! suite. Environment faults are retried and, if they persist, reported as
//! `error` verdicts rather than folded into killed or survived.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::domain::errors::OracleError;
use crate::domain::models::{
    Artifact, MutantOutcome, MutantVerdict, MutationConfig, MutationIntent, MutationPack,
    MutationReport, OracleVerdict, ProbeObservation, SpecRef, TestTarget, TrialPolicy,
    TrialReport,
};
use crate::domain::ports::{BehaviorProbe, TestOracle};
use crate::services::metrics::aggregate_trials;

/// Tunables for a mutation run.
#[derive(Debug, Clone, Copy)]
pub struct MutationSettings {
    pub activation_attempts: u32,
    pub error_retries: u32,
    pub concurrency: usize,
    pub policy: TrialPolicy,
}

impl Default for MutationSettings {
    fn default() -> Self {
        Self::from(&MutationConfig::default())
    }
}

impl From<&MutationConfig> for MutationSettings {
    fn from(config: &MutationConfig) -> Self {
        Self {
            activation_attempts: config.activation_attempts.max(1),
            error_retries: config.error_retries,
            concurrency: config.concurrency.max(1),
            policy: config.policy,
        }
    }
}

/// Evaluates mutation intents against a reference implementation.
pub struct MutationEngine {
    oracle: Arc<dyn TestOracle>,
    probe: Arc<dyn BehaviorProbe>,
    settings: MutationSettings,
}

impl MutationEngine {
    pub fn new(
        oracle: Arc<dyn TestOracle>,
        probe: Arc<dyn BehaviorProbe>,
        settings: MutationSettings,
    ) -> Self {
        Self {
            oracle,
            probe,
            settings,
        }
    }

    /// Run every intent in `pack` for `trials` independent trials.
    pub async fn evaluate_pack(
        &self,
        spec: &SpecRef,
        reference: &Artifact,
        pack: &MutationPack,
        suite: &TestTarget,
        trials: u32,
    ) -> Result<MutationReport, OracleError> {
        let mut report = self
            .evaluate(spec, reference, &pack.mutations, suite, trials)
            .await?;
        report.mutation_pack_id.clone_from(&pack.mutation_pack_id);
        Ok(report)
    }

    /// Run every intent for `trials` independent trials.
    ///
    /// Fails only when the unmutated reference cannot be observed, since no
    /// activation verdict is meaningful without it.
    #[tracing::instrument(skip_all, fields(spec = %spec, intents = intents.len(), trials = trials))]
    pub async fn evaluate(
        &self,
        spec: &SpecRef,
        reference: &Artifact,
        intents: &[MutationIntent],
        suite: &TestTarget,
        trials: u32,
    ) -> Result<MutationReport, OracleError> {
        let trials = trials.max(1);
        let mut reports = Vec::with_capacity(trials as usize);

        for trial in 1..=trials {
            let baseline = self.observe_with_retries(None, reference).await?;
            tracing::debug!(
                trial,
                passed = baseline.passed,
                failed = baseline.failed,
                "reference observed"
            );

            let outcomes: Vec<MutantOutcome> = stream::iter(intents)
                .map(|intent| self.evaluate_mutant(intent, reference, &baseline, suite))
                .buffered(self.settings.concurrency)
                .collect()
                .await;

            let report = TrialReport::new(trial, outcomes);
            tracing::info!(
                trial,
                total = report.counts.total,
                activated = report.counts.activated,
                killed = report.counts.killed,
                survived = report.counts.survived,
                errored = report.counts.errored,
                score = %report.score,
                "mutation trial complete"
            );
            reports.push(report);
        }

        let aggregate = aggregate_trials(&reports, self.settings.policy);
        Ok(MutationReport {
            spec: spec.name.clone(),
            spec_version: spec.version.to_string(),
            mutation_pack_id: None,
            artifact_hash: reference.content_hash(),
            trials: reports,
            aggregate,
        })
    }

    async fn evaluate_mutant(
        &self,
        intent: &MutationIntent,
        reference: &Artifact,
        baseline: &ProbeObservation,
        suite: &TestTarget,
    ) -> MutantOutcome {
        let (verdict, activation_attempts) =
            self.classify(intent, reference, baseline, suite).await;

        match &verdict {
            MutantVerdict::Inapplicable { reason } => {
                tracing::warn!(mutant_id = %intent.id, %reason, "mutation inapplicable");
            }
            MutantVerdict::Error { message } => {
                tracing::error!(mutant_id = %intent.id, %message, "mutant evaluation errored");
            }
            other => {
                tracing::debug!(mutant_id = %intent.id, verdict = other.label(), "mutant classified");
            }
        }

        MutantOutcome {
            mutant_id: intent.id.clone(),
            severity: intent.severity.clone(),
            category: intent.category.clone(),
            verdict,
            activation_attempts,
        }
    }

    async fn classify(
        &self,
        intent: &MutationIntent,
        reference: &Artifact,
        baseline: &ProbeObservation,
        suite: &TestTarget,
    ) -> (MutantVerdict, u32) {
        let mutant = match intent.patch.apply(reference) {
            Ok(mutant) => mutant,
            Err(e) => {
                return (
                    MutantVerdict::Inapplicable {
                        reason: e.to_string(),
                    },
                    0,
                )
            }
        };

        // Intents carrying their own probe inputs need a baseline observed
        // with the same inputs.
        let scoped_baseline;
        let baseline = if intent.activation_probe.is_some() {
            match self.observe_with_retries(Some(intent), reference).await {
                Ok(observation) => {
                    scoped_baseline = observation;
                    &scoped_baseline
                }
                Err(e) => {
                    return (
                        MutantVerdict::Error {
                            message: format!("reference probe failed: {e}"),
                        },
                        0,
                    )
                }
            }
        } else {
            baseline
        };

        // Activation
        let mut attempts = 0;
        let mut activated = false;
        while attempts < self.settings.activation_attempts {
            attempts += 1;
            match self.observe_with_retries(Some(intent), &mutant).await {
                Ok(observation) if observation.diverges_from(baseline) => {
                    activated = true;
                    break;
                }
                Ok(_) => {
                    tracing::debug!(mutant_id = %intent.id, attempt = attempts, "no divergence");
                }
                Err(e) => {
                    return (
                        MutantVerdict::Error {
                            message: format!("activation probe failed: {e}"),
                        },
                        attempts,
                    )
                }
            }
        }
        if !activated {
            return (MutantVerdict::NonActivating, attempts);
        }

        // Kill
        let verdict = match self.run_suite_with_retries(suite, &mutant).await {
            Ok(Some(failing_tests)) => MutantVerdict::Killed { failing_tests },
            Ok(None) => MutantVerdict::Survived,
            Err(message) => MutantVerdict::Error { message },
        };
        (verdict, attempts)
    }

    async fn observe_with_retries(
        &self,
        intent: Option<&MutationIntent>,
        artifact: &Artifact,
    ) -> Result<ProbeObservation, OracleError> {
        let mut attempt = 0;
        loop {
            match self.probe.observe(intent, artifact).await {
                Ok(observation) => return Ok(observation),
                Err(e) if attempt < self.settings.error_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "probe failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `Ok(Some(failing))` when tests failed, `Ok(None)` when all passed.
    async fn run_suite_with_retries(
        &self,
        suite: &TestTarget,
        mutant: &Artifact,
    ) -> Result<Option<Vec<String>>, String> {
        let mut attempt = 0;
        loop {
            let failure = match self.oracle.run(suite, mutant).await {
                Ok(run) => match run.verdict() {
                    OracleVerdict::AllPassed => return Ok(None),
                    OracleVerdict::TestsFailed => return Ok(Some(run.failing_tests)),
                    OracleVerdict::InfrastructureFailure { reason } => reason,
                },
                Err(e) => e.to_string(),
            };

            if attempt >= self.settings.error_retries {
                return Err(failure);
            }
            attempt += 1;
            tracing::warn!(error = %failure, attempt, "suite run failed, retrying");
        }
    }
}

// ---------------------------------------------------------------------------
// Default activation probe
// ---------------------------------------------------------------------------

/// Replays a suite in compare-outputs mode: the observation is the summary
/// counts plus the set of failing test ids. Per-intent probe inputs are
/// ignored; every intent is observed through the whole suite.
pub struct SuiteReplayProbe {
    oracle: Arc<dyn TestOracle>,
    target: TestTarget,
}

impl SuiteReplayProbe {
    pub fn new(oracle: Arc<dyn TestOracle>, target: TestTarget) -> Self {
        Self { oracle, target }
    }
}

#[async_trait]
impl BehaviorProbe for SuiteReplayProbe {
    async fn observe(
        &self,
        _intent: Option<&MutationIntent>,
        artifact: &Artifact,
    ) -> Result<ProbeObservation, OracleError> {
        let run = self.oracle.run(&self.target, artifact).await?;
        if let OracleVerdict::InfrastructureFailure { reason } = run.verdict() {
            return Err(OracleError::Infrastructure(reason));
        }
        let summary = run.summary.unwrap_or_default();
        Ok(ProbeObservation {
            passed: summary.passed,
            failed: summary.failed,
            failing_tests: run.failing_tests.into_iter().collect::<BTreeSet<_>>(),
        })
    }
}
