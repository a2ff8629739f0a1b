//! Pass-rate metrics and cross-trial mutation-score reconciliation.
//!
//! Pure functions over counts. Suite provenance is checked here so that VPR,
//! HPR and SURS can only be computed from the suite they are defined over.

use std::collections::HashMap;
use std::fmt;

use crate::domain::errors::MetricsError;
use crate::domain::models::{
    MutantVerdict, MutationScore, SpecRef, SuitePartition, TestTarget, TrialAggregate, TrialPolicy,
    TrialReport,
};

// ---------------------------------------------------------------------------
// Pass rates
// ---------------------------------------------------------------------------

/// A `(passed, total)` pair with `passed <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassRate {
    passed: u32,
    total: u32,
}

impl PassRate {
    pub fn new(passed: u32, total: u32) -> Result<Self, MetricsError> {
        if passed > total {
            return Err(MetricsError::PassedExceedsTotal { passed, total });
        }
        Ok(Self { passed, total })
    }

    pub const fn passed(self) -> u32 {
        self.passed
    }

    pub const fn total(self) -> u32 {
        self.total
    }

    /// Percentage in `[0, 100]`; `0` when no tests ran.
    pub fn percent(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(self.total) * 100.0
        }
    }

    /// No tests ran. Distinct from "tests ran and all failed".
    pub const fn no_tests(self) -> bool {
        self.total == 0
    }
}

impl fmt::Display for PassRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}%)",
            self.passed,
            self.total,
            format_percent(self.percent(), 1)
        )
    }
}

/// `passed / total` as a percentage, `0` when `total = 0`.
pub fn pass_rate(passed: u32, total: u32) -> Result<f64, MetricsError> {
    PassRate::new(passed, total).map(PassRate::percent)
}

/// Format a percentage with a leading digit and a fixed number of decimals.
pub fn format_percent(value: f64, decimals: usize) -> String {
    let value = if value == 0.0 || !value.is_finite() {
        0.0
    } else {
        value
    };
    format!("{value:.decimals$}")
}

/// Round for persistence.
pub fn round_percent(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn require_suite(
    metric: &'static str,
    expected_spec: &SpecRef,
    expected_partition: SuitePartition,
    target: &TestTarget,
) -> Result<(), MetricsError> {
    if target.spec != *expected_spec || target.partition != expected_partition {
        return Err(MetricsError::WrongSuite {
            metric,
            expected: format!("{expected_spec} {expected_partition}"),
            actual: format!("{} {}", target.spec, target.partition),
        });
    }
    Ok(())
}

/// Visible pass rate of `spec`'s artifact on `spec`'s visible suite.
pub fn vpr(
    spec: &SpecRef,
    target: &TestTarget,
    passed: u32,
    total: u32,
) -> Result<PassRate, MetricsError> {
    require_suite("VPR", spec, SuitePartition::Visible, target)?;
    PassRate::new(passed, total)
}

/// Hidden pass rate of `spec`'s artifact on `spec`'s hidden suite.
pub fn hpr(
    spec: &SpecRef,
    target: &TestTarget,
    passed: u32,
    total: u32,
) -> Result<PassRate, MetricsError> {
    require_suite("HPR", spec, SuitePartition::Hidden, target)?;
    PassRate::new(passed, total)
}

/// Regression score: the prior version's visible suite against `artifact_spec`'s
/// compiled artifact.
pub fn surs(
    artifact_spec: &SpecRef,
    target: &TestTarget,
    passed: u32,
    total: u32,
) -> Result<PassRate, MetricsError> {
    let prior = artifact_spec
        .previous()
        .ok_or_else(|| MetricsError::NoPriorVersion(artifact_spec.to_string()))?;
    require_suite("SURS", &prior, SuitePartition::Visible, target)?;
    PassRate::new(passed, total)
}

// ---------------------------------------------------------------------------
// Trial reconciliation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IntentTally {
    activated: u32,
    killed: u32,
}

/// Collapse per-trial mutation results into one aggregate under `policy`.
pub fn aggregate_trials(trials: &[TrialReport], policy: TrialPolicy) -> TrialAggregate {
    let defined: Vec<f64> = trials.iter().filter_map(|t| t.score.percent()).collect();
    let mean_score = if defined.is_empty() {
        MutationScore::Undefined
    } else {
        MutationScore::Defined(defined.iter().sum::<f64>() / defined.len() as f64)
    };
    let min_score = defined
        .iter()
        .copied()
        .reduce(f64::min)
        .map_or(MutationScore::Undefined, MutationScore::Defined);
    let max_score = defined
        .iter()
        .copied()
        .reduce(f64::max)
        .map_or(MutationScore::Undefined, MutationScore::Defined);

    let mut order = Vec::new();
    let mut tallies: HashMap<&str, IntentTally> = HashMap::new();
    for outcome in trials.iter().flat_map(|t| &t.outcomes) {
        if !outcome.verdict.is_activated() {
            continue;
        }
        let tally = tallies.entry(outcome.mutant_id.as_str()).or_insert_with(|| {
            order.push(outcome.mutant_id.clone());
            IntentTally::default()
        });
        tally.activated += 1;
        if matches!(outcome.verdict, MutantVerdict::Killed { .. }) {
            tally.killed += 1;
        }
    }

    let mut killed_in_all = Vec::new();
    let mut killed_in_some = Vec::new();
    let mut never_killed = Vec::new();
    for id in order {
        let Some(tally) = tallies.get(id.as_str()) else {
            continue;
        };
        if tally.killed == 0 {
            never_killed.push(id);
        } else if tally.killed == tally.activated {
            killed_in_all.push(id);
        } else {
            killed_in_some.push(id);
        }
    }

    let ever_activated = u32::try_from(tallies.len()).unwrap_or(u32::MAX);
    let headline_score = match policy {
        TrialPolicy::Mean => mean_score,
        TrialPolicy::AllTrials => MutationScore::from_counts(
            u32::try_from(killed_in_all.len()).unwrap_or(u32::MAX),
            ever_activated,
        ),
        TrialPolicy::AnyTrial => MutationScore::from_counts(
            u32::try_from(killed_in_all.len() + killed_in_some.len()).unwrap_or(u32::MAX),
            ever_activated,
        ),
    };

    TrialAggregate {
        policy,
        trials: u32::try_from(trials.len()).unwrap_or(u32::MAX),
        mean_score,
        min_score,
        max_score,
        killed_in_all,
        killed_in_some,
        never_killed,
        headline_score,
    }
}
