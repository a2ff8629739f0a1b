use std::fmt::Write as _;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::errors::AgentError;
use crate::domain::models::config::AgentConfig;
use crate::domain::ports::{AgentRequest, AgentTurn, TransformationAgent};
use crate::services::summary_parser::parse_agent_cost;

/// Runs an external editing agent in a scratch directory holding the
/// artifact file, then reads the edited file back.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    artifact_file: String,
    timeout: Duration,
}

impl CommandAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            artifact_file: config.artifact_file.clone(),
            timeout: config.timeout(),
        }
    }

    fn format_prompt(&self, request: &AgentRequest) -> String {
        let mut prompt = format!(
            "Iteration {}/{} for {}.\n\n",
            request.iteration, request.max_iterations, request.spec
        );

        match request.feedback {
            Some(ref feedback) => {
                prompt.push_str("Visible tests are failing.");
                if !feedback.failing_tests.is_empty() {
                    let _ = writeln!(
                        prompt,
                        " {} failing test(s):",
                        feedback.failing_tests.len()
                    );
                    for id in &feedback.failing_tests {
                        let _ = writeln!(prompt, "- {id}");
                    }
                }
                let _ = write!(
                    prompt,
                    "\n--- BEGIN TEST OUTPUT ---\n{}\n--- END TEST OUTPUT ---\n\n",
                    feedback.excerpt.trim_end()
                );
                prompt.push_str("Read the assertion errors to understand why the tests fail.\n");
            }
            None => prompt.push_str("No test results are available yet.\n"),
        }

        let _ = writeln!(
            prompt,
            "Edit ONLY the file {} in the current directory.",
            self.artifact_file
        );
        prompt
    }
}

#[async_trait]
impl TransformationAgent for CommandAgent {
    #[tracing::instrument(skip_all, fields(spec = %request.spec, iteration = request.iteration))]
    async fn revise(&self, request: AgentRequest) -> Result<AgentTurn, AgentError> {
        let workdir = tempfile::Builder::new().prefix("tdad-agent-").tempdir()?;
        let artifact_path = workdir.path().join(&self.artifact_file);
        tokio::fs::write(&artifact_path, request.artifact.content()).await?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to get stdin handle".to_string()))?;
        let prompt = self.format_prompt(&request);

        let output = timeout(self.timeout, async move {
            stdin.write_all(prompt.as_bytes()).await?;
            // Close stdin to signal end of input
            drop(stdin);
            child.wait_with_output().await
        })
        .await
        .map_err(|_| AgentError::Timeout(self.timeout))??;

        // Usage is reported even when the agent fails afterwards.
        let transcript = String::from_utf8_lossy(&output.stdout).into_owned();
        let cost = parse_agent_cost(&transcript);

        if !output.status.success() {
            return Err(AgentError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                cost,
            });
        }

        let revised = tokio::fs::read_to_string(&artifact_path)
            .await
            .map_err(|e| AgentError::ArtifactReadBack {
                reason: format!("{}: {e}", artifact_path.display()),
                cost,
            })?;
        if revised.trim().is_empty() {
            return Err(AgentError::ArtifactReadBack {
                reason: format!("{} is empty", artifact_path.display()),
                cost,
            });
        }

        tracing::debug!(
            changed = revised != request.artifact.content(),
            cost = %cost.format_summary(),
            "agent turn finished"
        );

        Ok(AgentTurn {
            artifact: request.artifact.revise(revised),
            cost,
            transcript,
        })
    }
}
