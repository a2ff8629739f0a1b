//! Statistics across repeated pipeline runs of the same spec version.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::models::{RunRecord, SpecVersion};

/// Summary statistics of one metric over `n` runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Sample standard deviation; `0` for a single run.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

impl MetricStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean,
            std,
            min,
            max,
            n,
        })
    }
}

/// Everything known about one `spec/version` across runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecVersionAggregate {
    pub spec: String,
    pub version: SpecVersion,
    pub num_runs: usize,
    pub run_ids: Vec<String>,
    pub metrics: BTreeMap<&'static str, MetricStats>,
    pub timing: BTreeMap<&'static str, MetricStats>,
    pub total_cost_usd: Option<MetricStats>,
}

type Extractor = fn(&RunRecord) -> Option<f64>;

const METRICS: &[(&str, Extractor)] = &[
    ("vpr_percent", |r| {
        (!r.metrics.vpr_no_tests && r.metrics.vpr_total > 0).then_some(r.metrics.vpr_percent)
    }),
    ("hpr_percent", |r| {
        (!r.metrics.hpr_no_tests && r.metrics.hpr_total > 0).then_some(r.metrics.hpr_percent)
    }),
    ("mutation_score", |r| r.metrics.mutation_score),
    ("surs_percent", |r| {
        (r.metrics.surs_total > 0).then_some(r.metrics.surs_percent)
    }),
    ("compiler_iterations", |r| {
        r.metrics
            .convergence_state
            .map(|_| f64::from(r.metrics.compiler_iterations))
    }),
    ("seed_vpr_passed", |r| {
        (r.metrics.seed_vpr_total > 0).then_some(f64::from(r.metrics.seed_vpr_passed))
    }),
    ("seed_vpr_total", |r| {
        (r.metrics.seed_vpr_total > 0).then_some(f64::from(r.metrics.seed_vpr_total))
    }),
];

const TIMING: &[(&str, Extractor)] = &[
    ("test_generation_seconds", |r| positive(r.timing.test_generation_seconds)),
    ("convergence_seconds", |r| positive(r.timing.convergence_seconds)),
    ("hidden_evaluation_seconds", |r| positive(r.timing.hidden_evaluation_seconds)),
    ("mutation_seconds", |r| positive(r.timing.mutation_seconds)),
    ("regression_seconds", |r| positive(r.timing.regression_seconds)),
    ("total_seconds", |r| positive(r.timing.total_seconds)),
];

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

fn collect(runs: &[&RunRecord], table: &[(&'static str, Extractor)]) -> BTreeMap<&'static str, MetricStats> {
    table
        .iter()
        .filter_map(|(name, extract)| {
            let values: Vec<f64> = runs.iter().filter_map(|r| extract(r)).collect();
            MetricStats::from_values(&values).map(|stats| (*name, stats))
        })
        .collect()
}

/// Group records by `spec/version` and summarize each group.
///
/// A metric a run did not produce (no tests, undefined score, stage not run)
/// is left out of that metric's sample rather than counted as zero.
pub fn aggregate_runs(records: &[RunRecord]) -> BTreeMap<String, SpecVersionAggregate> {
    let mut grouped: BTreeMap<String, Vec<&RunRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(format!("{}/{}", record.spec, record.version))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .filter_map(|(key, runs)| {
            let first = runs.first()?;
            let costs: Vec<f64> = runs
                .iter()
                .map(|r| r.costs.total.total_cost_usd())
                .filter(|c| *c > 0.0)
                .collect();
            let aggregate = SpecVersionAggregate {
                spec: first.spec.clone(),
                version: first.version,
                num_runs: runs.len(),
                run_ids: runs.iter().map(|r| r.run_id.clone()).collect(),
                metrics: collect(&runs, METRICS),
                timing: collect(&runs, TIMING),
                total_cost_usd: MetricStats::from_values(&costs),
            };
            Some((key, aggregate))
        })
        .collect()
}
