//! Narrow parsers for the textual protocols spoken by external collaborators.
//!
//! Every parser reports an absent field as absent (or zero, where the protocol
//! says so) and never fails on unexpected text. Nothing outside this module
//! looks at raw collaborator output.

use std::collections::HashSet;

use crate::domain::models::{parse_usd_micros, CostRecord, MutationScore, TestSummary};

/// Marker of the agent's per-invocation cost line.
pub const COST_SUMMARY: &str = "COST_SUMMARY";

/// Marker of the test harness's evaluation cost line.
pub const TEST_COST_SUMMARY: &str = "TEST_COST_SUMMARY";

// ---------------------------------------------------------------------------
// Test summary
// ---------------------------------------------------------------------------

/// Parse pass/fail counts from the last summary line of a test run.
///
/// Summary lines look like `3 failed, 12 passed in 4.20s`. Lines are scanned
/// from the end and the first one carrying at least one `<N> passed`,
/// `<N> failed` or `<N> error(s)` count wins. Returns `None` when no such line
/// exists.
pub fn parse_test_summary(output: &str) -> Option<TestSummary> {
    output.lines().rev().find_map(parse_summary_line)
}

fn parse_summary_line(line: &str) -> Option<TestSummary> {
    let tokens: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(|t| t.trim_matches('='))
        .filter(|t| !t.is_empty())
        .collect();

    let mut summary = TestSummary::default();
    let mut found = false;
    for pair in tokens.windows(2) {
        let Ok(count) = pair[0].parse::<u32>() else {
            continue;
        };
        match pair[1] {
            "passed" => summary.passed = count,
            "failed" => summary.failed = count,
            "error" | "errors" => summary.errors = count,
            _ => continue,
        }
        found = true;
    }

    found.then_some(summary)
}

// ---------------------------------------------------------------------------
// Cost lines
// ---------------------------------------------------------------------------

/// Parse the last `<marker>: key=value ...` line in `output`.
///
/// Missing or malformed keys count as zero. Returns `None` when no line
/// carries the marker, which callers treat as zero cost.
pub fn parse_cost_line(output: &str, marker: &str) -> Option<CostRecord> {
    let fields = output.lines().rev().find_map(|line| {
        line.trim_start()
            .strip_prefix(marker)
            .and_then(|rest| rest.strip_prefix(':'))
    })?;

    let mut cost = CostRecord::zero();
    for pair in fields.split_whitespace() {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let tokens = || value.parse::<u64>().unwrap_or(0);
        match key {
            "input_tokens" => cost.input_tokens = tokens(),
            "cache_creation" => cost.cache_creation_tokens = tokens(),
            "cache_read" => cost.cache_read_tokens = tokens(),
            "output_tokens" => cost.output_tokens = tokens(),
            "total_cost_usd" => cost.cost_micros = parse_usd_micros(value).unwrap_or(0),
            _ => {}
        }
    }
    Some(cost)
}

/// Agent cost, zero when the agent printed no `COST_SUMMARY` line.
pub fn parse_agent_cost(output: &str) -> CostRecord {
    parse_cost_line(output, COST_SUMMARY).unwrap_or_default()
}

/// Evaluation cost, zero when the harness printed no `TEST_COST_SUMMARY` line.
pub fn parse_evaluation_cost(output: &str) -> CostRecord {
    parse_cost_line(output, TEST_COST_SUMMARY).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Failing tests and feedback
// ---------------------------------------------------------------------------

fn is_node_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '/' | '.' | ':' | '-')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Test node ids from `FAILED <path>::<name>` lines, deduplicated in order.
pub fn extract_failing_tests(output: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for (index, _) in output.match_indices("FAILED") {
        let rest = &output[index + "FAILED".len()..];
        let trimmed = rest.trim_start();
        if trimmed.len() == rest.len() {
            continue;
        }
        let run_len = trimmed
            .find(|c: char| !is_node_char(c))
            .unwrap_or(trimmed.len());
        if let Some(id) = node_id(&trimmed[..run_len]) {
            if seen.insert(id.to_string()) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Trim a candidate run down to `<path>::<name>`, ending at the name.
fn node_id(run: &str) -> Option<&str> {
    let mut search_end = run.len();
    while let Some(sep) = run[..search_end].rfind("::") {
        let name_start = sep + 2;
        let name_len = run[name_start..]
            .find(|c: char| !is_word_char(c))
            .unwrap_or(run.len() - name_start);
        if name_len > 0 && sep > 0 {
            return Some(&run[..name_start + name_len]);
        }
        search_end = sep;
    }
    None
}

/// Reduce test output to the failure details and summary lines.
///
/// Keeps the `FAILURES` section and everything from the first summary-looking
/// line on. Falls back to the full output when nothing matched.
pub fn extract_failure_feedback(output: &str) -> String {
    let mut kept = Vec::new();
    let mut in_failures = false;
    let mut in_summary = false;

    for line in output.lines() {
        if line.replace(' ', "").contains("=FAILURES=") {
            in_failures = true;
            kept.push(line);
        } else if in_failures {
            if line.starts_with('=') {
                in_failures = false;
            } else {
                kept.push(line);
            }
        }

        let is_summary = line.to_lowercase().contains("short test summary")
            || line.contains("passed")
            || line.contains("failed")
            || line.contains("error");
        if is_summary {
            if !in_failures {
                kept.push(line);
                in_summary = true;
            }
        } else if in_summary && !line.trim().is_empty() && !line.starts_with('=') {
            kept.push(line);
        }
    }

    let extracted = kept.join("\n");
    if extracted.trim().is_empty() {
        output.to_string()
    } else {
        extracted
    }
}

// ---------------------------------------------------------------------------
// Mutation report
// ---------------------------------------------------------------------------

/// The discrete fields of a rendered mutation report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutationSummaryFields {
    pub total: u32,
    pub activated: u32,
    pub inconclusive: u32,
    pub killed: u32,
    pub survived: u32,
    pub score: MutationScore,
}

impl Default for MutationSummaryFields {
    fn default() -> Self {
        Self {
            total: 0,
            activated: 0,
            inconclusive: 0,
            killed: 0,
            survived: 0,
            score: MutationScore::Undefined,
        }
    }
}

/// Read the summary fields of a rendered mutation report.
///
/// When several trial blocks are present the last value of each field wins.
/// Missing or unreadable fields are `0` (counts) or `N/A` (score).
pub fn parse_mutation_report(text: &str) -> MutationSummaryFields {
    let mut fields = MutationSummaryFields::default();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let count = || value.parse::<u32>().unwrap_or(0);
        match key.trim() {
            "Total mutations" => fields.total = count(),
            "Activated" => fields.activated = count(),
            "Inconclusive" => fields.inconclusive = count(),
            "Killed" => fields.killed = count(),
            "Survived" => fields.survived = count(),
            "Mutation Score" => {
                fields.score = value
                    .trim_end_matches('%')
                    .parse::<f64>()
                    .map_or(MutationScore::Undefined, MutationScore::Defined);
            }
            _ => {}
        }
    }
    fields
}
