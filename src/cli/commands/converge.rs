//! `tdad converge`: drive the artifact toward a full visible-suite pass.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, table, truncate, usd, CommandOutput};
use crate::domain::models::{ConvergenceResult, IterationRecord, TerminalState};
use crate::domain::ports::TestGenerator;
use crate::services::metrics::format_percent;
use crate::services::ConvergenceDriver;

#[derive(Args, Debug)]
pub struct ConvergeArgs {
    /// Specification name
    pub spec: String,
    /// Specification version (defaults to the configured spec_version)
    #[arg(long)]
    pub spec_version: Option<String>,
    /// Override convergence.max_iterations
    #[arg(short, long)]
    pub max_iterations: Option<u32>,
    /// Start from the seed even if a compiled artifact exists
    #[arg(long)]
    pub fresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ConvergeOutput {
    pub spec: String,
    pub terminal: TerminalState,
    pub iterations: u32,
    pub max_iterations: u32,
    pub vpr_passed: u32,
    pub vpr_total: u32,
    pub seed_vpr_passed: u32,
    pub seed_vpr_total: u32,
    pub agent_cost_usd: f64,
    pub evaluation_cost_usd: f64,
    pub elapsed_seconds: f64,
    pub reason: Option<String>,
    pub artifact_saved: bool,
    pub history: Vec<IterationRecord>,
}

impl ConvergeOutput {
    fn new(spec: String, result: &ConvergenceResult, artifact_saved: bool) -> Self {
        let (vpr_passed, vpr_total) = result.visible_counts();
        let (seed_vpr_passed, seed_vpr_total) = result.seed_counts();
        Self {
            spec,
            terminal: result.terminal,
            iterations: result.iterations,
            max_iterations: result.max_iterations,
            vpr_passed,
            vpr_total,
            seed_vpr_passed,
            seed_vpr_total,
            agent_cost_usd: result.total_cost.total_cost_usd(),
            evaluation_cost_usd: result.evaluation_cost.total_cost_usd(),
            elapsed_seconds: result.elapsed.as_secs_f64(),
            reason: result.reason.clone(),
            artifact_saved,
            history: result.history.clone(),
        }
    }
}

impl CommandOutput for ConvergeOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{}: {} after {}/{} iteration(s)",
            self.spec, self.terminal, self.iterations, self.max_iterations
        )];
        if self.vpr_total > 0 {
            lines.push(format!(
                "Visible pass rate: {}/{} ({}%)",
                self.vpr_passed,
                self.vpr_total,
                format_percent(
                    f64::from(self.vpr_passed) / f64::from(self.vpr_total) * 100.0,
                    1
                )
            ));
        }
        if self.seed_vpr_total > 0 {
            lines.push(format!("Seed: {}/{}", self.seed_vpr_passed, self.seed_vpr_total));
        }
        if let Some(ref reason) = self.reason {
            lines.push(format!("Reason: {reason}"));
        }
        lines.push(format!(
            "Cost: {} agent, {} evaluation, {:.1}s",
            usd(self.agent_cost_usd),
            usd(self.evaluation_cost_usd),
            self.elapsed_seconds
        ));

        if !self.history.is_empty() {
            let mut t = table(["Iter", "Passed", "Failed", "Cost", "Failing tests"]);
            for it in &self.history {
                t.add_row(vec![
                    it.iteration.to_string(),
                    it.passed.to_string(),
                    it.failed.to_string(),
                    usd(it.cost.total_cost_usd()),
                    truncate(&it.failing_tests.join(", "), 60),
                ]);
            }
            lines.push(t.to_string());
        }
        if !self.artifact_saved && !self.terminal.has_artifact() {
            lines.push("No artifact saved.".to_string());
        }
        lines.join("\n")
    }
}

pub async fn execute(args: ConvergeArgs, ctx: &AppContext, json: bool) -> Result<()> {
    let spec = ctx.spec_ref(&args.spec, args.spec_version.as_deref())?;
    let target = ctx.generator().visible_target(&spec);
    if !target.path.is_dir() {
        anyhow::bail!("Visible suite not found at {}", target.path.display());
    }
    let seed = ctx.load_seed(&spec, args.fresh).await?;
    let max_iterations = args
        .max_iterations
        .unwrap_or(ctx.config.convergence.max_iterations);

    let driver = ConvergenceDriver::new(
        ctx.oracle(),
        ctx.agent(),
        ctx.driver_settings(),
        ctx.abort.clone(),
    );
    let result = driver.run(seed, &target, max_iterations).await;

    let saved = if result.terminal.has_artifact() {
        ctx.save_artifact(&spec, &result.final_artifact)
            .await
            .context("Failed to persist converged artifact")?;
        true
    } else {
        false
    };

    output(&ConvergeOutput::new(spec.to_string(), &result, saved), json);
    Ok(())
}
