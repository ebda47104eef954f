use super::RecordStore;
use crate::error::UploadError;
use crate::model::{UploadRecord, UploadStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Process-local record store for development and tests
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Uuid, UploadRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: &UploadRecord) -> Result<(), UploadError> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(UploadError::StoreFailure(format!(
                "upload {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, UploadError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UploadRecord>, UploadError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: UploadStatus,
        next: UploadStatus,
        result_url: Option<String>,
    ) -> Result<Option<UploadRecord>, UploadError> {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != expected {
            return Ok(None);
        }

        record.status = next;
        record.result_url = result_url;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn ping(&self) -> Result<(), UploadError> {
        Ok(())
    }
}
