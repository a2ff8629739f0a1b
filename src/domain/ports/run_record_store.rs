//! Run record store port - append-only persistence of run records.

use async_trait::async_trait;

use crate::domain::errors::StoreError;
use crate::domain::models::{RunRecord, SpecVersion};

#[async_trait]
pub trait RunRecordStore: Send + Sync {
    /// Persist `record` standalone and append it to the ledger.
    ///
    /// Safe under concurrent callers; a record key may be written only once.
    async fn append(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Fetch one standalone record by its key.
    async fn get(
        &self,
        spec: &str,
        version: SpecVersion,
        run_id: &str,
    ) -> Result<Option<RunRecord>, StoreError>;

    /// The full ledger, in append order.
    async fn list(&self) -> Result<Vec<RunRecord>, StoreError>;
}
