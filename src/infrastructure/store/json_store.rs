use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::errors::StoreError;
use crate::domain::models::{RunRecord, SpecVersion};
use crate::domain::ports::RunRecordStore;

pub const LEDGER_FILE: &str = "all_runs.json";
pub const AGGREGATE_FILE: &str = "aggregated.json";

/// Run records as JSON files under one results directory.
///
/// Every record is written standalone as `<key>.json` and appended to the
/// `all_runs.json` ledger. Appends are serialized in-process by a mutex and
/// across processes by an exclusive `all_runs.json.lock` file.
#[derive(Debug)]
pub struct JsonRunRecordStore {
    dir: PathBuf,
    lock_timeout: Duration,
    local: Mutex<()>,
}

/// Removes the lock file when dropped.
struct LedgerLock {
    path: PathBuf,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release ledger lock");
        }
    }
}

impl JsonRunRecordStore {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout,
            local: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{LEDGER_FILE}.lock"))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn acquire(&self) -> Result<LedgerLock, StoreError> {
        let path = self.lock_path();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(250))
            .with_max_elapsed_time(Some(self.lock_timeout))
            .build();

        let result = backoff::future::retry(policy, || async {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    if let Err(e) = file
                        .write_all(std::process::id().to_string().as_bytes())
                        .await
                    {
                        tracing::warn!(lock = %path.display(), error = %e, "failed to write owner pid to ledger lock");
                    }
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    Err(backoff::Error::transient(StoreError::LockTimeout(
                        path.display().to_string(),
                    )))
                }
                Err(e) => Err(backoff::Error::permanent(StoreError::Io(e))),
            }
        })
        .await;

        result.map(|()| LedgerLock { path })
    }

    async fn read_ledger(&self) -> Result<Vec<RunRecord>, StoreError> {
        match tokio::fs::read(self.ledger_path()).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the standalone `<key>.json`.
    ///
    /// An existing file with identical content is left in place: it is the
    /// remainder of an earlier append that failed before the ledger update.
    async fn write_standalone(&self, key: &str, record: &RunRecord) -> Result<(), StoreError> {
        let path = self.record_path(key);
        let body = serde_json::to_vec_pretty(record)?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&body).await?;
                file.flush().await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing: Option<RunRecord> = tokio::fs::read(&path)
                    .await
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok());
                if existing.as_ref() == Some(record) {
                    tracing::debug!(key, "standalone record already present, completing ledger append");
                    Ok(())
                } else {
                    Err(StoreError::AlreadyExists(key.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write `bytes` next to `path` and rename over it.
    async fn replace(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Persist a derived summary next to the ledger.
    pub async fn write_aggregate<T: serde::Serialize + Sync>(&self, value: &T) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(AGGREGATE_FILE);
        Self::replace(&path, &serde_json::to_vec_pretty(value)?).await?;
        Ok(path)
    }
}

#[async_trait]
impl RunRecordStore for JsonRunRecordStore {
    #[tracing::instrument(skip_all, fields(key = %record.key()))]
    async fn append(&self, record: &RunRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let _local = self.local.lock().await;
        let _lock = self.acquire().await?;

        // The ledger must parse before anything is written.
        let key = record.key();
        let mut ledger = self.read_ledger().await?;
        if ledger.iter().any(|r| r.key() == key) {
            return Err(StoreError::AlreadyExists(key));
        }

        self.write_standalone(&key, record).await?;

        ledger.push(record.clone());
        Self::replace(&self.ledger_path(), &serde_json::to_vec_pretty(&ledger)?).await?;

        tracing::info!(ledger_len = ledger.len(), "run record appended");
        Ok(())
    }

    async fn get(
        &self,
        spec: &str,
        version: SpecVersion,
        run_id: &str,
    ) -> Result<Option<RunRecord>, StoreError> {
        let path = self.record_path(&format!("{spec}_{version}_{run_id}"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        self.read_ledger().await
    }
}
