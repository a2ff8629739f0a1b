//! Test suites, oracle runs, and the verdicts derived from them.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cost::CostRecord;
use super::specification::SpecRef;

/// Which half of a specification's suite a target addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuitePartition {
    /// Used as oracle feedback during convergence.
    Visible,
    /// Held out; only used to measure generalization.
    Hidden,
}

impl fmt::Display for SuitePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible => write!(f, "visible"),
            Self::Hidden => write!(f, "hidden"),
        }
    }
}

/// A concrete test directory for one specification version and partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTarget {
    pub spec: SpecRef,
    pub partition: SuitePartition,
    pub path: PathBuf,
}

impl TestTarget {
    pub fn new(spec: SpecRef, partition: SuitePartition, path: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            partition,
            path: path.into(),
        }
    }
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.spec, self.partition, self.path.display())
    }
}

/// Pass/fail counts parsed from an oracle's summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    /// Tests that errored during setup or teardown.
    #[serde(default)]
    pub errors: u32,
}

impl TestSummary {
    pub const fn new(passed: u32, failed: u32) -> Self {
        Self {
            passed,
            failed,
            errors: 0,
        }
    }

    /// Tests that ran to a pass/fail verdict.
    pub const fn total(&self) -> u32 {
        self.passed + self.failed
    }

    pub const fn all_passing(&self) -> bool {
        self.failed == 0 && self.errors == 0 && self.passed > 0
    }
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} passed", self.passed, self.total())?;
        if self.errors > 0 {
            write!(f, ", {} errors", self.errors)?;
        }
        Ok(())
    }
}

/// The raw result of one test-oracle invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleRun {
    /// Process exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    /// Parsed summary counts; `None` when no summary line was printed.
    pub summary: Option<TestSummary>,
    /// Failing test ids, deduplicated, in order of first appearance.
    pub failing_tests: Vec<String>,
    /// Combined stdout/stderr.
    pub output: String,
    /// Evaluation cost reported by the test harness, zero when absent.
    pub cost: CostRecord,
    pub duration: Duration,
}

/// Classification of an [`OracleRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleVerdict {
    /// Every collected test passed.
    AllPassed,
    /// Tests ran and at least one did not pass.
    TestsFailed,
    /// The harness did not produce a usable verdict (nothing collected).
    InfrastructureFailure { reason: String },
}

impl OracleRun {
    pub fn verdict(&self) -> OracleVerdict {
        let Some(summary) = self.summary.filter(|s| s.total() > 0) else {
            return OracleVerdict::InfrastructureFailure {
                reason: format!(
                    "no tests collected (exit code {})",
                    self.exit_code
                        .map_or_else(|| "signal".to_string(), |c| c.to_string())
                ),
            };
        };

        if summary.failed == 0 && summary.errors == 0 && self.exit_code == Some(0) {
            OracleVerdict::AllPassed
        } else {
            OracleVerdict::TestsFailed
        }
    }

    /// `(passed, total)`, with `(0, 0)` when no summary was produced.
    pub fn counts(&self) -> (u32, u32) {
        self.summary.map_or((0, 0), |s| (s.passed, s.total()))
    }
}

/// What the agent sees about the previous oracle run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleFeedback {
    pub failing_tests: Vec<String>,
    /// Failure details and summary lines extracted from the oracle output.
    pub excerpt: String,
}
