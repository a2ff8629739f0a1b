//! Versioned on-disk locations of artifacts, suites, mutation packs and results.

use std::path::{Path, PathBuf};

use crate::domain::models::config::Config;
use crate::domain::models::{SpecRef, SuitePartition, TestTarget};

pub const SEED_FILE: &str = "seed_prompt.txt";
pub const ARTIFACT_FILE: &str = "system_prompt.txt";
pub const MUTATION_PACK_FILE: &str = "mutations.yaml";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    suffix: String,
    results_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            results_dir: root.join("results"),
            root,
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let layout = Self::new(&config.root_dir, config.artifact_suffix.clone());
        let results_dir = if config.store.results_dir.is_absolute() {
            config.store.results_dir.clone()
        } else {
            config.root_dir.join(&config.store.results_dir)
        };
        Self {
            results_dir,
            ..layout
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifacts are keyed by spec and suffix, not by version: a later
    /// version's run starts from what the previous one left behind.
    pub fn artifact_dir(&self, spec: &SpecRef) -> PathBuf {
        self.root
            .join("agent_artifacts")
            .join("core")
            .join(format!("{}{}", spec.name, self.suffix))
    }

    pub fn seed_path(&self, spec: &SpecRef) -> PathBuf {
        self.artifact_dir(spec).join(SEED_FILE)
    }

    pub fn artifact_path(&self, spec: &SpecRef) -> PathBuf {
        self.artifact_dir(spec).join(ARTIFACT_FILE)
    }

    pub fn suite_dir(&self, spec: &SpecRef, partition: SuitePartition) -> PathBuf {
        let tree = match partition {
            SuitePartition::Visible => "tests_visible",
            SuitePartition::Hidden => "tests_hidden",
        };
        self.root
            .join(tree)
            .join("core")
            .join(&spec.name)
            .join(spec.version.to_string())
    }

    pub fn target(&self, spec: &SpecRef, partition: SuitePartition) -> TestTarget {
        TestTarget::new(spec.clone(), partition, self.suite_dir(spec, partition))
    }

    pub fn mutation_pack_path(&self, spec: &SpecRef) -> PathBuf {
        self.root
            .join("mutation_packs")
            .join("core")
            .join(&spec.name)
            .join(spec.version.to_string())
            .join(MUTATION_PACK_FILE)
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }
}
