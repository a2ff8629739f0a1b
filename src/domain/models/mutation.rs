//! Mutation intents, mutant verdicts, and mutation reports.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use crate::domain::errors::PatchError;

// ---------------------------------------------------------------------------
// Intents and patches
// ---------------------------------------------------------------------------

/// One search/replace edit within a mutation patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEdit {
    pub find: String,
    pub replace: String,
}

/// A structural patch against the reference implementation.
///
/// Every edit must locate its search text in the (progressively edited)
/// content; the first occurrence is replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationPatch {
    pub edits: Vec<PatchEdit>,
}

impl MutationPatch {
    /// Apply the patch to a private copy of `reference`.
    pub fn apply(&self, reference: &Artifact) -> Result<Artifact, PatchError> {
        if self.edits.is_empty() {
            return Err(PatchError::Empty);
        }

        let mut content = reference.content().to_string();
        for (index, edit) in self.edits.iter().enumerate() {
            if edit.find.is_empty() {
                return Err(PatchError::EmptySearch { index });
            }
            if !content.contains(&edit.find) {
                return Err(PatchError::NotFound { index });
            }
            content = content.replacen(&edit.find, &edit.replace, 1);
        }

        Ok(reference.clone().revise(content))
    }
}

/// A named, clause-traceable semantic deviation from the specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationIntent {
    pub id: String,
    /// Human description of the behavior the mutant violates.
    pub intent: String,
    #[serde(default = "unknown")]
    pub severity: String,
    #[serde(default = "unknown")]
    pub category: String,
    /// The specification clause this mutant is meant to violate.
    #[serde(default)]
    pub clause: Option<String>,
    pub patch: MutationPatch,
    /// Intent-specific probe inputs, interpreted by the configured
    /// [`BehaviorProbe`](crate::domain::ports::BehaviorProbe).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_probe: Option<serde_yaml::Value>,
}

fn unknown() -> String {
    "unknown".to_string()
}

/// A mutation pack as authored for one specification version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPack {
    #[serde(default)]
    pub mutation_pack_id: Option<String>,
    #[serde(default)]
    pub mutations: Vec<MutationIntent>,
}

// ---------------------------------------------------------------------------
// Probe observations
// ---------------------------------------------------------------------------

/// What a behavioral probe saw when exercising an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeObservation {
    pub passed: u32,
    pub failed: u32,
    pub failing_tests: BTreeSet<String>,
}

impl ProbeObservation {
    /// Whether the two observations differ on any probe.
    pub fn diverges_from(&self, other: &Self) -> bool {
        self != other
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// The final classification of one mutant within one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum MutantVerdict {
    /// The patch could not be applied; excluded from all counts.
    Inapplicable { reason: String },
    /// No probe diverged from the reference; excluded from the score.
    NonActivating,
    /// At least one test failed against the activated mutant.
    Killed { failing_tests: Vec<String> },
    /// Every test passed despite the behavioral deviation.
    Survived,
    /// The environment failed; neither killed nor survived.
    Error { message: String },
}

impl MutantVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inapplicable { .. } => "INAPPLICABLE",
            Self::NonActivating => "INCONCLUSIVE",
            Self::Killed { .. } => "KILLED",
            Self::Survived => "SURVIVED",
            Self::Error { .. } => "ERROR",
        }
    }

    pub const fn is_activated(&self) -> bool {
        matches!(self, Self::Killed { .. } | Self::Survived)
    }
}

/// A mutant's verdict together with its intent metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantOutcome {
    pub mutant_id: String,
    pub severity: String,
    pub category: String,
    #[serde(flatten)]
    pub verdict: MutantVerdict,
    pub activation_attempts: u32,
}

// ---------------------------------------------------------------------------
// Scores and counts
// ---------------------------------------------------------------------------

/// Killed / activated, as a percentage; undefined when nothing activated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum MutationScore {
    Defined(f64),
    Undefined,
}

impl MutationScore {
    pub fn from_counts(killed: u32, activated: u32) -> Self {
        if activated == 0 {
            Self::Undefined
        } else {
            Self::Defined(f64::from(killed) / f64::from(activated) * 100.0)
        }
    }

    pub const fn percent(self) -> Option<f64> {
        match self {
            Self::Defined(p) => Some(p),
            Self::Undefined => None,
        }
    }
}

impl From<Option<f64>> for MutationScore {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Undefined, Self::Defined)
    }
}

impl From<MutationScore> for Option<f64> {
    fn from(value: MutationScore) -> Self {
        value.percent()
    }
}

impl fmt::Display for MutationScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(p) => write!(f, "{p:.1}%"),
            Self::Undefined => write!(f, "N/A"),
        }
    }
}

/// Per-trial tallies. `total` counts only mutants whose patch applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationCounts {
    pub total: u32,
    pub inapplicable: u32,
    pub non_activating: u32,
    pub activated: u32,
    pub killed: u32,
    pub survived: u32,
    pub errored: u32,
}

impl MutationCounts {
    pub fn tally(outcomes: &[MutantOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.verdict {
                MutantVerdict::Inapplicable { .. } => {
                    counts.inapplicable += 1;
                    continue;
                }
                MutantVerdict::NonActivating => counts.non_activating += 1,
                MutantVerdict::Killed { .. } => {
                    counts.activated += 1;
                    counts.killed += 1;
                }
                MutantVerdict::Survived => {
                    counts.activated += 1;
                    counts.survived += 1;
                }
                MutantVerdict::Error { .. } => counts.errored += 1,
            }
            counts.total += 1;
        }
        counts
    }

    pub fn score(&self) -> MutationScore {
        MutationScore::from_counts(self.killed, self.activated)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// The result of one full pass over every intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    /// 1-based trial number.
    pub trial: u32,
    pub counts: MutationCounts,
    pub score: MutationScore,
    /// `false` when any mutant ended in an environment error.
    pub complete: bool,
    pub outcomes: Vec<MutantOutcome>,
}

impl TrialReport {
    pub fn new(trial: u32, outcomes: Vec<MutantOutcome>) -> Self {
        let counts = MutationCounts::tally(&outcomes);
        Self {
            trial,
            score: counts.score(),
            complete: counts.errored == 0,
            counts,
            outcomes,
        }
    }

    /// Render the discrete, independently parseable summary fields.
    pub fn render_summary(&self) -> String {
        let c = &self.counts;
        let mut lines = vec![
            format!("Total mutations: {}", c.total),
            format!("Activated: {}", c.activated),
            format!("Inconclusive: {}", c.non_activating),
            format!("Killed: {}", c.killed),
            format!("Survived: {}", c.survived),
        ];
        if c.inapplicable > 0 {
            lines.push(format!("Inapplicable: {}", c.inapplicable));
        }
        if c.errored > 0 {
            lines.push(format!("Errored: {}", c.errored));
        }
        lines.push(format!("Mutation Score: {}", self.score));
        lines.join("\n")
    }

    /// Intents that were activated and survived in this trial.
    pub fn survivors(&self) -> impl Iterator<Item = &MutantOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.verdict, MutantVerdict::Survived))
    }
}

/// How per-trial results collapse into one headline score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPolicy {
    /// Mean of the defined per-trial scores.
    #[default]
    Mean,
    /// An intent counts as killed only if killed in every trial.
    AllTrials,
    /// An intent counts as killed if killed in at least one trial.
    AnyTrial,
}

impl fmt::Display for TrialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::AllTrials => write!(f, "all_trials"),
            Self::AnyTrial => write!(f, "any_trial"),
        }
    }
}

/// Cross-trial reconciliation of a mutation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialAggregate {
    pub policy: TrialPolicy,
    pub trials: u32,
    pub mean_score: MutationScore,
    pub min_score: MutationScore,
    pub max_score: MutationScore,
    /// Intents killed in every trial.
    pub killed_in_all: Vec<String>,
    /// Intents killed in some, but not all, trials.
    pub killed_in_some: Vec<String>,
    /// Intents activated at least once but never killed.
    pub never_killed: Vec<String>,
    /// The score selected by `policy`.
    pub headline_score: MutationScore,
}

/// Everything a mutation run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationReport {
    pub spec: String,
    pub spec_version: String,
    #[serde(default)]
    pub mutation_pack_id: Option<String>,
    /// Content hash of the reference artifact the mutants were derived from.
    pub artifact_hash: String,
    pub trials: Vec<TrialReport>,
    pub aggregate: TrialAggregate,
}

impl MutationReport {
    pub fn is_complete(&self) -> bool {
        self.trials.iter().all(|t| t.complete)
    }

    /// The most recent trial, whose counts are carried into run records.
    pub fn last_trial(&self) -> Option<&TrialReport> {
        self.trials.last()
    }

    /// Render every trial's summary block followed by the aggregate.
    pub fn render_text(&self) -> String {
        let mut sections = Vec::with_capacity(self.trials.len() + 1);
        let n = self.trials.len();
        for trial in &self.trials {
            sections.push(format!(
                "Trial {}/{}\n{}",
                trial.trial,
                n,
                trial.render_summary()
            ));
        }

        let agg = &self.aggregate;
        sections.push(format!(
            "Aggregate over {} trial(s) [{}]\nMean score: {}\nScore range: {} - {}\nKilled in all trials: {}\nKilled in some trials: {}\nNever killed: {}\nHeadline score: {}",
            agg.trials,
            agg.policy,
            agg.mean_score,
            agg.min_score,
            agg.max_score,
            agg.killed_in_all.len(),
            agg.killed_in_some.len(),
            agg.never_killed.len(),
            agg.headline_score,
        ));
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(find: &str, replace: &str) -> PatchEdit {
        PatchEdit {
            find: find.into(),
            replace: replace.into(),
        }
    }

    fn outcome(id: &str, verdict: MutantVerdict) -> MutantOutcome {
        MutantOutcome {
            mutant_id: id.into(),
            severity: "high".into(),
            category: "policy".into(),
            verdict,
            activation_attempts: 1,
        }
    }

    #[test]
    fn patch_applies_to_private_copy() {
        let reference = Artifact::seed("always verify identity before refunds");
        let patch = MutationPatch {
            edits: vec![edit("always verify", "never verify")],
        };

        let mutant = patch.apply(&reference).unwrap();
        assert_eq!(mutant.content(), "never verify identity before refunds");
        assert_eq!(reference.content(), "always verify identity before refunds");
    }

    #[test]
    fn patch_inapplicable_cases() {
        let reference = Artifact::seed("abc");
        assert_eq!(MutationPatch::default().apply(&reference), Err(PatchError::Empty));
        assert_eq!(
            MutationPatch { edits: vec![edit("", "x")] }.apply(&reference),
            Err(PatchError::EmptySearch { index: 0 })
        );
        assert_eq!(
            MutationPatch {
                edits: vec![edit("a", "z"), edit("missing", "x")]
            }
            .apply(&reference),
            Err(PatchError::NotFound { index: 1 })
        );
    }

    #[test]
    fn tally_excludes_inapplicable_from_total() {
        let outcomes = vec![
            outcome("m1", MutantVerdict::Killed { failing_tests: vec![] }),
            outcome("m2", MutantVerdict::Survived),
            outcome("m3", MutantVerdict::NonActivating),
            outcome("m4", MutantVerdict::Inapplicable { reason: "nope".into() }),
            outcome("m5", MutantVerdict::Error { message: "crash".into() }),
        ];
        let counts = MutationCounts::tally(&outcomes);
        assert_eq!(counts.total, 4);
        assert_eq!(counts.inapplicable, 1);
        assert_eq!(counts.non_activating, 1);
        assert_eq!(counts.activated, 2);
        assert_eq!(counts.killed, 1);
        assert_eq!(counts.survived, 1);
        assert_eq!(counts.errored, 1);
        assert_eq!(counts.score(), MutationScore::Defined(50.0));
    }

    #[test]
    fn score_undefined_without_activation() {
        let counts = MutationCounts::tally(&[outcome("m1", MutantVerdict::NonActivating)]);
        assert_eq!(counts.score(), MutationScore::Undefined);
        assert_eq!(counts.score().to_string(), "N/A");
    }

    #[test]
    fn trial_summary_renders_contract_fields() {
        let trial = TrialReport::new(
            1,
            vec![
                outcome("m1", MutantVerdict::Killed { failing_tests: vec![] }),
                outcome("m2", MutantVerdict::NonActivating),
            ],
        );
        let text = trial.render_summary();
        assert!(text.contains("Total mutations: 2"));
        assert!(text.contains("Activated: 1"));
        assert!(text.contains("Killed: 1"));
        assert!(text.contains("Survived: 0"));
        assert!(text.contains("Mutation Score: 100.0%"));
        assert!(trial.complete);
    }

    #[test]
    fn verdict_serializes_tagged() {
        let o = outcome("m1", MutantVerdict::Killed { failing_tests: vec!["t::a".into()] });
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["verdict"], "killed");
        assert_eq!(json["failing_tests"][0], "t::a");
        assert_eq!(json["mutant_id"], "m1");
    }

    #[test]
    fn intents_parse_from_yaml() {
        let yaml = r#"
mutation_pack_id: supportops-v1
mutations:
  - id: skip_auth
    intent: Skip identity verification before cancelling
    severity: critical
    patch:
      - find: "MUST verify identity"
        replace: "MAY verify identity"
"#;
        let pack: MutationPack = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pack.mutation_pack_id.as_deref(), Some("supportops-v1"));
        assert_eq!(pack.mutations.len(), 1);
        let m = &pack.mutations[0];
        assert_eq!(m.category, "unknown");
        assert_eq!(m.patch.edits[0].replace, "MAY verify identity");
        assert!(m.activation_probe.is_none());
    }

    #[test]
    fn activation_probe_is_kept_per_intent() {
        let yaml = r#"
mutations:
  - id: skip_auth
    intent: Skip identity verification
    patch:
      - find: "MUST verify identity"
        replace: "MAY verify identity"
    activation_probe:
      inputs:
        - "I want a refund for order 123"
      expect_change: true
"#;
        let pack: MutationPack = serde_yaml::from_str(yaml).unwrap();
        let probe = pack.mutations[0].activation_probe.as_ref().unwrap();
        assert_eq!(probe["inputs"][0].as_str(), Some("I want a refund for order 123"));
        assert_eq!(probe["expect_change"].as_bool(), Some(true));
    }
}
