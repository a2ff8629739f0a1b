//! Wiring of configured adapters for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::domain::models::config::Config;
use crate::domain::models::{Artifact, SpecRef, SpecVersion};
use crate::domain::ports::{TestOracle, TransformationAgent};
use crate::infrastructure::agent::CommandAgent;
use crate::infrastructure::generator::PresetSuites;
use crate::infrastructure::layout::StorageLayout;
use crate::infrastructure::oracle::CommandOracle;
use crate::infrastructure::store::JsonRunRecordStore;
use crate::services::{AbortSignal, DriverSettings, MutationSettings, PipelineSettings};

/// Everything a command needs, built once from the loaded configuration.
pub struct AppContext {
    pub config: Config,
    pub layout: StorageLayout,
    pub abort: AbortSignal,
}

impl AppContext {
    pub fn new(config: Config, abort: AbortSignal) -> Self {
        Self {
            layout: StorageLayout::from_config(&config),
            config,
            abort,
        }
    }

    /// `spec` at the requested version, falling back to the configured one.
    pub fn spec_ref(&self, name: &str, version: Option<&str>) -> Result<SpecRef> {
        let raw = version.unwrap_or(&self.config.spec_version);
        let version: SpecVersion = raw.parse().with_context(|| format!("Invalid spec version '{raw}'"))?;
        Ok(SpecRef::new(name, version))
    }

    pub fn oracle(&self) -> Arc<dyn TestOracle> {
        Arc::new(CommandOracle::new(&self.config.oracle))
    }

    pub fn agent(&self) -> Arc<dyn TransformationAgent> {
        Arc::new(CommandAgent::new(&self.config.agent))
    }

    pub fn generator(&self) -> Arc<PresetSuites> {
        Arc::new(PresetSuites::new(self.layout.clone()))
    }

    pub fn store(&self) -> Arc<JsonRunRecordStore> {
        Arc::new(JsonRunRecordStore::new(
            self.layout.results_dir(),
            self.config.store.lock_timeout(),
        ))
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings::from(&self.config.convergence)
    }

    pub fn pipeline_settings(&self, max_iterations: Option<u32>, trials: Option<u32>) -> PipelineSettings {
        PipelineSettings {
            driver: self.driver_settings(),
            mutation: MutationSettings::from(&self.config.mutation),
            max_iterations: max_iterations.unwrap_or(self.config.convergence.max_iterations),
            trials: trials.unwrap_or(self.config.mutation.trials),
        }
    }

    /// The artifact a run starts from: the last compiled one unless `fresh`
    /// or none exists yet, in which case the authored seed.
    pub async fn load_seed(&self, spec: &SpecRef, fresh: bool) -> Result<Artifact> {
        let compiled = self.layout.artifact_path(spec);
        if !fresh {
            if let Some(content) = read_optional(&compiled).await? {
                tracing::info!(path = %compiled.display(), "starting from compiled artifact");
                return Ok(Artifact::seed(content));
            }
        }
        let seed = self.layout.seed_path(spec);
        let content = tokio::fs::read_to_string(&seed)
            .await
            .with_context(|| format!("Failed to read seed artifact {}", seed.display()))?;
        tracing::info!(path = %seed.display(), "starting from seed artifact");
        Ok(Artifact::seed(content))
    }

    /// The compiled artifact mutation testing is run against.
    pub async fn load_compiled(&self, spec: &SpecRef) -> Result<Artifact> {
        let path = self.layout.artifact_path(spec);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("No compiled artifact at {}; run `tdad converge` first", path.display()))?;
        Ok(Artifact::seed(content))
    }

    pub async fn save_artifact(&self, spec: &SpecRef, artifact: &Artifact) -> Result<()> {
        let path = self.layout.artifact_path(spec);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, artifact.content())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), revision = artifact.revision(), "artifact saved");
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if !content.trim().is_empty() => Ok(Some(content)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
