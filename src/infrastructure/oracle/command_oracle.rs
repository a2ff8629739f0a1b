use std::io::Write;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::errors::OracleError;
use crate::domain::models::config::OracleConfig;
use crate::domain::models::{Artifact, OracleRun, TestTarget};
use crate::domain::ports::TestOracle;
use crate::services::summary_parser::{
    extract_failing_tests, parse_evaluation_cost, parse_test_summary,
};

const TARGET_PLACEHOLDER: &str = "{target}";

/// Runs an external test harness against an artifact.
///
/// The artifact is written to a temporary file whose path is exported
/// through `artifact_env`; the harness is expected to load the system
/// under test from there.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    artifact_env: String,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            artifact_env: config.artifact_env.clone(),
            timeout: config.timeout(),
        }
    }

    fn build_command(&self, target: &TestTarget, artifact_path: &std::path::Path) -> Command {
        let target_path = target.path.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace(TARGET_PLACEHOLDER, &target_path)),
        )
        .env(&self.artifact_env, artifact_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TestOracle for CommandOracle {
    #[tracing::instrument(skip_all, fields(target = %target, revision = artifact.revision()))]
    async fn run(&self, target: &TestTarget, artifact: &Artifact) -> Result<OracleRun, OracleError> {
        let mut artifact_file = tempfile::Builder::new()
            .prefix("tdad-artifact-")
            .suffix(".txt")
            .tempfile()?;
        artifact_file.write_all(artifact.content().as_bytes())?;
        artifact_file.flush()?;

        let started = Instant::now();
        let child = self
            .build_command(target, artifact_file.path())
            .spawn()
            .map_err(|e| OracleError::Spawn(format!("{}: {e}", self.program)))?;

        // Dropping the future on timeout kills the child.
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))??;
        let duration = started.elapsed();

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            combined.push('\n');
            combined.push_str(&stderr);
        }

        let run = OracleRun {
            exit_code: output.status.code(),
            summary: parse_test_summary(&combined),
            failing_tests: extract_failing_tests(&combined),
            cost: parse_evaluation_cost(&combined),
            output: combined,
            duration,
        };

        tracing::debug!(
            exit_code = ?run.exit_code,
            summary = ?run.summary,
            failing = run.failing_tests.len(),
            elapsed_ms = duration.as_millis(),
            "oracle run finished"
        );
        Ok(run)
    }
}
