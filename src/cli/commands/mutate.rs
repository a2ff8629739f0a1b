//! `tdad mutate`: score the visible suite against a mutation pack.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::domain::models::{MutantVerdict, MutationReport};
use crate::domain::ports::TestGenerator;
use crate::infrastructure::mutation_pack::load_mutation_pack;
use crate::services::{MutationEngine, MutationSettings, SuiteReplayProbe};

#[derive(Args, Debug)]
pub struct MutateArgs {
    /// Specification name
    pub spec: String,
    /// Specification version (defaults to the configured spec_version)
    #[arg(long)]
    pub spec_version: Option<String>,
    /// Override mutation.trials
    #[arg(short, long)]
    pub trials: Option<u32>,
    /// Mutation pack to use instead of the one in the storage layout
    #[arg(long)]
    pub pack: Option<PathBuf>,
    /// Also write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct MutateOutput {
    pub report: MutationReport,
}

impl CommandOutput for MutateOutput {
    fn to_human(&self) -> String {
        let mut text = self.report.render_text();
        let survivors: Vec<_> = self
            .report
            .last_trial()
            .map(|t| t.survivors().collect())
            .unwrap_or_default();
        if !survivors.is_empty() {
            let mut t = table(["Survivor", "Severity", "Category"]);
            for outcome in survivors {
                t.add_row(vec![
                    outcome.mutant_id.clone(),
                    outcome.severity.clone(),
                    outcome.category.clone(),
                ]);
            }
            text.push_str("\n\n");
            text.push_str(&t.to_string());
        }
        let errored: Vec<_> = self
            .report
            .trials
            .iter()
            .flat_map(|t| t.outcomes.iter())
            .filter_map(|o| match o.verdict {
                MutantVerdict::Error { ref message } => Some(format!(
                    "{}: {}",
                    o.mutant_id,
                    truncate(message, 80)
                )),
                _ => None,
            })
            .collect();
        if !errored.is_empty() {
            text.push_str("\n\nErrored mutants:\n");
            text.push_str(&errored.join("\n"));
        }
        text
    }
}

pub async fn execute(args: MutateArgs, ctx: &AppContext, json: bool) -> Result<()> {
    let spec = ctx.spec_ref(&args.spec, args.spec_version.as_deref())?;
    let pack_path = args
        .pack
        .unwrap_or_else(|| ctx.layout.mutation_pack_path(&spec));
    let pack = load_mutation_pack(&pack_path)
        .await?
        .with_context(|| format!("No mutation pack at {}", pack_path.display()))?;
    let reference = ctx.load_compiled(&spec).await?;
    let suite = ctx.generator().visible_target(&spec);
    if !suite.path.is_dir() {
        anyhow::bail!("Visible suite not found at {}", suite.path.display());
    }

    let oracle = ctx.oracle();
    let probe = Arc::new(SuiteReplayProbe::new(Arc::clone(&oracle), suite.clone()));
    let engine = MutationEngine::new(oracle, probe, MutationSettings::from(&ctx.config.mutation));
    let trials = args.trials.unwrap_or(ctx.config.mutation.trials);

    let report = tokio::select! {
        report = engine.evaluate_pack(&spec, &reference, &pack, &suite, trials) => {
            report.context("Mutation testing failed")?
        }
        () = ctx.abort.aborted() => anyhow::bail!("Mutation testing aborted"),
    };

    if let Some(path) = args.output {
        let body = serde_json::to_vec_pretty(&report)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "mutation report written");
    }

    output(&MutateOutput { report }, json);
    Ok(())
}
