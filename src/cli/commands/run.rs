//! `tdad run`: the full staged pipeline for one specification version.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, table, usd, CommandOutput};
use crate::domain::models::{RunRecord, Stage};
use crate::infrastructure::mutation_pack::load_mutation_pack;
use crate::services::metrics::format_percent;
use crate::services::{EvaluationPipeline, PipelineRequest};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Specification name
    pub spec: String,
    /// Specification version (defaults to the configured spec_version)
    #[arg(long)]
    pub spec_version: Option<String>,
    /// Override convergence.max_iterations
    #[arg(short, long)]
    pub max_iterations: Option<u32>,
    /// Override mutation.trials
    #[arg(short, long)]
    pub trials: Option<u32>,
    /// Start from the seed even if a compiled artifact exists
    #[arg(long)]
    pub fresh: bool,
    /// Skip the mutation stage even if a pack exists
    #[arg(long)]
    pub no_mutation: bool,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunOutput {
    pub record: RunRecord,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let r = &self.record;
        let m = &r.metrics;
        let mut lines = vec![format!("Run {} for {}/{}", r.run_id, r.spec, r.version)];

        let mut stages = table(["Stage", "Status", "Reason"]);
        for stage in Stage::ALL {
            stages.add_row(vec![
                stage.to_string(),
                r.stages.get(stage).to_string(),
                r.stage_reasons.get(&stage).cloned().unwrap_or_default(),
            ]);
        }
        lines.push(stages.to_string());

        let rate = |passed: u32, total: u32, percent: f64| {
            if total == 0 {
                "no tests".to_string()
            } else {
                format!("{passed}/{total} ({}%)", format_percent(percent, 1))
            }
        };
        lines.push(format!("VPR:  {}", rate(m.vpr_passed, m.vpr_total, m.vpr_percent)));
        lines.push(format!("HPR:  {}", rate(m.hpr_passed, m.hpr_total, m.hpr_percent)));
        lines.push(format!("SURS: {}", rate(m.surs_passed, m.surs_total, m.surs_percent)));
        lines.push(format!(
            "Mutation score: {} ({} killed / {} activated, {} trial(s))",
            m.mutation_score
                .map_or_else(|| "N/A".to_string(), |s| format!("{}%", format_percent(s, 1))),
            m.mutation_killed,
            m.mutation_activated,
            m.mutation_trials
        ));
        if let Some(state) = m.convergence_state {
            lines.push(format!("Convergence: {state} after {} iteration(s)", m.compiler_iterations));
        }
        lines.push(format!(
            "Total: {:.1}s, {}",
            r.timing.total_seconds,
            usd(r.costs.total.total_cost_usd())
        ));
        lines.join("\n")
    }
}

pub async fn execute(args: RunArgs, ctx: &AppContext, json: bool) -> Result<()> {
    let spec = ctx.spec_ref(&args.spec, args.spec_version.as_deref())?;
    let seed = ctx.load_seed(&spec, args.fresh).await?;
    let mutation_pack = if args.no_mutation {
        None
    } else {
        load_mutation_pack(&ctx.layout.mutation_pack_path(&spec)).await?
    };

    let pipeline = EvaluationPipeline::new(
        ctx.generator(),
        ctx.oracle(),
        ctx.agent(),
        ctx.store(),
        ctx.pipeline_settings(args.max_iterations, args.trials),
        ctx.abort.clone(),
    );
    let outcome = pipeline
        .run(PipelineRequest {
            spec: spec.clone(),
            seed,
            mutation_pack,
        })
        .await
        .context("Failed to persist run record")?;

    if let Some(ref result) = outcome.convergence {
        if result.terminal.has_artifact() {
            ctx.save_artifact(&spec, &result.final_artifact).await?;
        }
    }
    if let Some(ref report) = outcome.mutation {
        let path = ctx
            .layout
            .results_dir()
            .join(format!("mutation_{}.json", outcome.record.key()));
        tokio::fs::write(&path, serde_json::to_vec_pretty(report)?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    output(&RunOutput { record: outcome.record }, json);
    Ok(())
}
