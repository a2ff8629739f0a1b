//! Convergence loop state machine and its result.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::cost::CostRecord;
use super::suite::TestSummary;

/// How a convergence run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Every visible test passed.
    Converged,
    /// The iteration budget (or run wall-clock cap) was spent without a full pass.
    BudgetExhausted,
    /// The oracle failed to produce a verdict.
    OracleUnavailable,
    /// The transformation agent failed or timed out.
    AgentUnavailable,
    /// The run was cancelled from outside.
    Aborted,
}

impl TerminalState {
    /// Whether a compiled artifact exists that later stages can evaluate.
    pub const fn has_artifact(self) -> bool {
        matches!(self, Self::Converged | Self::BudgetExhausted)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::BudgetExhausted => "budget_exhausted",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::AgentUnavailable => "agent_unavailable",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// State of the convergence driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    /// `iteration` counts completed iterations.
    Iterating { iteration: u32 },
    Terminal(TerminalState),
}

/// Inputs to the driver state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    Start,
    /// The seed artifact already passes every visible test.
    SeedAccepted,
    /// One agent + oracle round finished with a usable verdict.
    IterationCompleted { all_passed: bool },
    BudgetSpent,
    RunDeadline,
    OracleFailed,
    AgentFailed,
    Cancelled,
}

impl DriverState {
    /// Apply an event. Terminal states absorb everything.
    pub const fn on(self, event: DriverEvent) -> Self {
        use DriverEvent as E;
        use TerminalState as T;

        match (self, event) {
            (Self::Terminal(_), _) => self,
            (Self::Idle, E::Start) => Self::Iterating { iteration: 0 },
            (_, E::Cancelled) => Self::Terminal(T::Aborted),
            (Self::Idle, _) => self,
            (Self::Iterating { .. }, E::Start) => self,
            (Self::Iterating { .. }, E::SeedAccepted) => Self::Terminal(T::Converged),
            (Self::Iterating { .. }, E::IterationCompleted { all_passed: true }) => {
                Self::Terminal(T::Converged)
            }
            (Self::Iterating { iteration }, E::IterationCompleted { all_passed: false }) => {
                Self::Iterating {
                    iteration: iteration + 1,
                }
            }
            (Self::Iterating { .. }, E::BudgetSpent | E::RunDeadline) => {
                Self::Terminal(T::BudgetExhausted)
            }
            (Self::Iterating { .. }, E::OracleFailed) => Self::Terminal(T::OracleUnavailable),
            (Self::Iterating { .. }, E::AgentFailed) => Self::Terminal(T::AgentUnavailable),
        }
    }

    pub const fn terminal(self) -> Option<TerminalState> {
        match self {
            Self::Terminal(t) => Some(t),
            _ => None,
        }
    }
}

/// Per-iteration bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: u32,
    pub artifact_revision: u32,
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub failing_tests: Vec<String>,
    pub cost: CostRecord,
    pub agent_elapsed_ms: u64,
    pub oracle_elapsed_ms: u64,
}

/// The outcome of one convergence run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceResult {
    pub terminal: TerminalState,
    /// Completed iterations, never more than `max_iterations`.
    pub iterations: u32,
    pub max_iterations: u32,
    /// The last artifact revision produced.
    pub final_artifact: Artifact,
    /// Visible-suite summary of `final_artifact`, if the oracle produced one.
    pub final_summary: Option<TestSummary>,
    pub seed_summary: Option<TestSummary>,
    pub history: Vec<IterationRecord>,
    /// Exact sum of every iteration's agent cost.
    pub total_cost: CostRecord,
    /// Evaluation cost reported by the oracle across iterations.
    pub evaluation_cost: CostRecord,
    pub elapsed: Duration,
    /// Why the run stopped, for non-converged outcomes.
    pub reason: Option<String>,
}

impl ConvergenceResult {
    /// `(passed, total)` on the visible suite.
    ///
    /// An unavailable oracle yields `(0, 0)` and callers must consult
    /// `terminal` rather than read it as a pass rate.
    pub fn visible_counts(&self) -> (u32, u32) {
        match self.terminal {
            TerminalState::OracleUnavailable => (0, 0),
            _ => self.final_summary.map_or((0, 0), |s| (s.passed, s.total())),
        }
    }

    pub fn seed_counts(&self) -> (u32, u32) {
        self.seed_summary.map_or((0, 0), |s| (s.passed, s.total()))
    }
}
