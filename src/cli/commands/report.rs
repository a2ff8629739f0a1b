//! `tdad report`: statistics across every recorded run.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, table, CommandOutput};
use crate::domain::ports::RunRecordStore;
use crate::services::{aggregate_runs, MetricStats, SpecVersionAggregate};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Only report this specification
    #[arg(long)]
    pub spec: Option<String>,
    /// Also write aggregated.json next to the ledger
    #[arg(short, long)]
    pub write: bool,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ReportOutput {
    pub aggregates: BTreeMap<String, SpecVersionAggregate>,
}

fn stat_cell(stats: Option<&MetricStats>, unit: &str) -> String {
    stats.map_or_else(
        || "-".to_string(),
        |s| {
            format!(
                "{:.1}{unit} ± {:.1} ({:.0}-{:.0}, n={})",
                s.mean, s.std, s.min, s.max, s.n
            )
        },
    )
}

impl CommandOutput for ReportOutput {
    fn to_human(&self) -> String {
        if self.aggregates.is_empty() {
            return "No runs recorded.".to_string();
        }

        let mut t = table([
            "Spec", "Runs", "VPR", "HPR", "Mutation", "SURS", "Iterations", "Cost (USD)",
        ]);
        for (key, agg) in &self.aggregates {
            t.add_row(vec![
                key.clone(),
                agg.num_runs.to_string(),
                stat_cell(agg.metrics.get("vpr_percent"), "%"),
                stat_cell(agg.metrics.get("hpr_percent"), "%"),
                stat_cell(agg.metrics.get("mutation_score"), "%"),
                stat_cell(agg.metrics.get("surs_percent"), "%"),
                stat_cell(agg.metrics.get("compiler_iterations"), ""),
                agg.total_cost_usd
                    .map_or_else(|| "-".to_string(), |c| format!("{:.4} ± {:.4}", c.mean, c.std)),
            ]);
        }
        t.to_string()
    }
}

pub async fn execute(args: ReportArgs, ctx: &AppContext, json: bool) -> Result<()> {
    let store = ctx.store();
    let mut records = store.list().await.context("Failed to read run ledger")?;
    if let Some(ref spec) = args.spec {
        records.retain(|r| &r.spec == spec);
    }
    let aggregates = aggregate_runs(&records);

    if args.write {
        let path = store
            .write_aggregate(&aggregates)
            .await
            .context("Failed to write aggregate")?;
        tracing::info!(path = %path.display(), groups = aggregates.len(), "aggregate written");
    }

    output(&ReportOutput { aggregates }, json);
    Ok(())
}
