use async_trait::async_trait;

use crate::domain::errors::GenerationError;
use crate::domain::models::{CostRecord, SpecRef, SuitePartition, TestTarget};
use crate::domain::ports::{GeneratedSuites, TestGenerator};
use crate::infrastructure::layout::StorageLayout;

/// Serves suites that were generated ahead of time into the storage layout.
#[derive(Debug, Clone)]
pub struct PresetSuites {
    layout: StorageLayout,
}

impl PresetSuites {
    pub const fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    async fn existing(&self, spec: &SpecRef, partition: SuitePartition) -> Result<TestTarget, GenerationError> {
        let target = self.layout.target(spec, partition);
        match tokio::fs::metadata(&target.path).await {
            Ok(meta) if meta.is_dir() => Ok(target),
            Ok(_) => Err(GenerationError::Failed(format!(
                "{} is not a directory",
                target.path.display()
            ))),
            Err(_) => Err(GenerationError::MissingSuite(
                target.path.display().to_string(),
            )),
        }
    }
}

#[async_trait]
impl TestGenerator for PresetSuites {
    async fn prepare(&self, spec: &SpecRef) -> Result<GeneratedSuites, GenerationError> {
        let visible = self.existing(spec, SuitePartition::Visible).await?;
        let hidden = self.existing(spec, SuitePartition::Hidden).await?;
        tracing::debug!(%spec, visible = %visible.path.display(), hidden = %hidden.path.display(), "suites located");
        Ok(GeneratedSuites {
            visible,
            hidden,
            cost: CostRecord::zero(),
        })
    }

    fn visible_target(&self, spec: &SpecRef) -> TestTarget {
        self.layout.target(spec, SuitePartition::Visible)
    }
}
