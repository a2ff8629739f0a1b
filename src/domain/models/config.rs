use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::mutation::TrialPolicy;

/// Main configuration structure for TDAD
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Specification version addressed by this process (`v1`, `v2`, ...)
    #[serde(default = "default_spec_version")]
    pub spec_version: String,

    /// Suffix distinguishing parallel artifact trees (e.g. `_v2`)
    #[serde(default)]
    pub artifact_suffix: String,

    /// Root of the artifact, suite and results trees
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Convergence loop budget and timeouts
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Mutation testing settings
    #[serde(default)]
    pub mutation: MutationConfig,

    /// Test oracle invocation
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Transformation agent invocation
    #[serde(default)]
    pub agent: AgentConfig,

    /// Run record storage
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_spec_version() -> String {
    "v1".to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spec_version: default_spec_version(),
            artifact_suffix: String::new(),
            root_dir: default_root_dir(),
            logging: LoggingConfig::default(),
            convergence: ConvergenceConfig::default(),
            mutation: MutationConfig::default(),
            oracle: OracleConfig::default(),
            agent: AgentConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log file rotation
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Convergence loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// Maximum agent + oracle iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock cap for a single agent or oracle invocation
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,

    /// Wall-clock cap for the whole convergence run
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Evaluate the seed artifact once before the first iteration
    #[serde(default = "default_true")]
    pub evaluate_seed: bool,
}

const fn default_max_iterations() -> u32 {
    6
}

const fn default_iteration_timeout_secs() -> u64 {
    1800
}

const fn default_run_timeout_secs() -> u64 {
    7200
}

const fn default_true() -> bool {
    true
}

impl ConvergenceConfig {
    pub const fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }

    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_timeout_secs: default_iteration_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            evaluate_seed: default_true(),
        }
    }
}

/// Mutation testing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MutationConfig {
    /// Independent repetitions of the full mutation procedure
    #[serde(default = "default_trials")]
    pub trials: u32,

    /// Probe attempts before a mutant is declared non-activating
    #[serde(default = "default_activation_attempts")]
    pub activation_attempts: u32,

    /// Retries of a mutant whose suite run hit an environment error
    #[serde(default = "default_error_retries")]
    pub error_retries: u32,

    /// Mutants evaluated concurrently within a trial
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cross-trial aggregation policy
    #[serde(default)]
    pub policy: TrialPolicy,
}

const fn default_trials() -> u32 {
    3
}

const fn default_activation_attempts() -> u32 {
    5
}

const fn default_error_retries() -> u32 {
    2
}

const fn default_concurrency() -> usize {
    1
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            activation_attempts: default_activation_attempts(),
            error_retries: default_error_retries(),
            concurrency: default_concurrency(),
            policy: TrialPolicy::default(),
        }
    }
}

/// Test oracle process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OracleConfig {
    /// Executable to run
    #[serde(default = "default_oracle_program")]
    pub program: String,

    /// Arguments; `{target}` is replaced by the test directory
    #[serde(default = "default_oracle_args")]
    pub args: Vec<String>,

    /// Environment variable through which the artifact path is passed
    #[serde(default = "default_artifact_env")]
    pub artifact_env: String,

    /// Per-invocation timeout
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_oracle_program() -> String {
    "pytest".to_string()
}

fn default_oracle_args() -> Vec<String> {
    vec!["{target}".to_string(), "-v".to_string(), "--tb=short".to_string()]
}

fn default_artifact_env() -> String {
    "TDAD_PROMPT_OVERRIDE_PATH".to_string()
}

const fn default_oracle_timeout_secs() -> u64 {
    600
}

impl OracleConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            program: default_oracle_program(),
            args: default_oracle_args(),
            artifact_env: default_artifact_env(),
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

/// Transformation agent process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Executable to run
    #[serde(default = "default_agent_program")]
    pub program: String,

    /// Arguments; the prompt is written to stdin
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,

    /// File name of the artifact inside the agent's working directory
    #[serde(default = "default_artifact_file")]
    pub artifact_file: String,

    /// Per-invocation timeout
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_program() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string(), "--dangerously-skip-permissions".to_string()]
}

fn default_artifact_file() -> String {
    "system_prompt.txt".to_string()
}

const fn default_agent_timeout_secs() -> u64 {
    900
}

impl AgentConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: default_agent_args(),
            artifact_file: default_artifact_file(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// Run record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Directory holding standalone records and the `all_runs.json` ledger
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// How long an append waits for the cross-process ledger lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

const fn default_lock_timeout_ms() -> u64 {
    10_000
}

impl StoreConfig {
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}
