//! Record store: durable mapping from upload id to [`UploadRecord`].

mod memory;
mod postgres;

pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;

use crate::error::UploadError;
use crate::model::{UploadRecord, UploadStatus};
use async_trait::async_trait;
use uuid::Uuid;

/// Storage contract shared by intake, confirmation and the worker.
///
/// Implementations give single-record atomicity only; nothing spans calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    async fn create(&self, record: &UploadRecord) -> Result<(), UploadError>;

    /// Fetch a record by id
    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, UploadError>;

    /// All records belonging to an owner, in no particular order
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UploadRecord>, UploadError>;

    /// Conditionally move a record to `next`.
    ///
    /// The write only applies while the stored status still equals `expected`.
    /// Returns the updated record, or `None` when the condition did not hold
    /// (including when the record does not exist). `result_url` replaces the
    /// stored value and `updated_at` is refreshed.
    async fn update_status(
        &self,
        id: Uuid,
        expected: UploadStatus,
        next: UploadStatus,
        result_url: Option<String>,
    ) -> Result<Option<UploadRecord>, UploadError>;

    /// Cheap connectivity check for readiness probes
    async fn ping(&self) -> Result<(), UploadError>;
}
