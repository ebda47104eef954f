use crate::error::UploadError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Processing status of an upload record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    /// Record created, bytes may or may not be in storage yet
    Pending,
    /// A worker has picked up the processing event
    Processing,
    /// Processing succeeded; `result_url` is set
    Completed,
    /// Processing failed or was cancelled
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Processing => "PROCESSING",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(UploadStatus::Pending),
            "PROCESSING" => Ok(UploadStatus::Processing),
            "COMPLETED" => Ok(UploadStatus::Completed),
            "FAILED" => Ok(UploadStatus::Failed),
            other => Err(UploadError::StoreFailure(format!(
                "unknown upload status '{other}'"
            ))),
        }
    }
}

/// Persisted metadata tracking one upload's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub file_name: String,
    pub content_type: String,
    pub declared_size: i64,
    pub storage_key: String,
    pub caption: Option<String>,
    pub status: UploadStatus,
    /// Present exactly when `status` is `Completed`
    pub result_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    /// Build the initial PENDING record for an accepted intake request
    pub fn pending(id: Uuid, request: NewUpload, storage_key: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: request.owner_id,
            file_name: request.file_name,
            content_type: request.content_type,
            declared_size: request.file_size,
            storage_key,
            caption: request.caption,
            status: UploadStatus::Pending,
            result_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trigger for post-upload processing.
///
/// Carries no status; the record store stays the single source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingEvent {
    pub upload_id: Uuid,
    pub owner_id: String,
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
}

impl From<&UploadRecord> for ProcessingEvent {
    fn from(record: &UploadRecord) -> Self {
        Self {
            upload_id: record.id,
            owner_id: record.owner_id.clone(),
            storage_key: record.storage_key.clone(),
            file_name: record.file_name.clone(),
            content_type: record.content_type.clone(),
        }
    }
}

/// Intake request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUpload {
    pub owner_id: String,
    pub file_name: String,
    pub content_type: String,
    pub file_size: i64,
    #[serde(default)]
    pub caption: Option<String>,
}

impl NewUpload {
    /// Reject requests that cannot produce a usable record
    pub fn validate(&self, max_upload_bytes: Option<u64>) -> Result<(), UploadError> {
        for (field, value) in [
            ("ownerId", &self.owner_id),
            ("fileName", &self.file_name),
            ("contentType", &self.content_type),
        ] {
            if value.trim().is_empty() {
                return Err(UploadError::InvalidRequest(format!("{field} must not be blank")));
            }
        }

        if self.file_size <= 0 {
            return Err(UploadError::InvalidRequest(
                "fileSize must be greater than zero".to_string(),
            ));
        }

        if let Some(max) = max_upload_bytes {
            if self.file_size as u64 > max {
                return Err(UploadError::InvalidRequest(format!(
                    "fileSize {} exceeds the {max} byte limit",
                    self.file_size
                )));
            }
        }

        Ok(())
    }
}

/// Time-scoped write credential for exactly one storage key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// Presigned `PUT` URL
    pub url: String,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

/// What the client receives from intake
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    pub id: Uuid,
    pub upload_credential: String,
    pub storage_key: String,
    pub expiration_minutes: u64,
    pub expires_at: DateTime<Utc>,
}

/// URL of the processing output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultUrl(String);

impl ResultUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only URLs cannot be stored on a COMPLETED record
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ResultUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker acknowledgement for a published processing event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewUpload {
        NewUpload {
            owner_id: "u1".to_string(),
            file_name: "a b.png".to_string(),
            content_type: "image/png".to_string(),
            file_size: 100,
            caption: Some("beach".to_string()),
        }
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Completed,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }

    #[test]
    fn test_pending_record() {
        let id = Uuid::new_v4();
        let record = UploadRecord::pending(id, request(), "uploads/u1/1_x_a_b.png".to_string());

        assert_eq!(record.id, id);
        assert_eq!(record.status, UploadStatus::Pending);
        assert_eq!(record.declared_size, 100);
        assert!(record.result_url.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_processing_event_wire_format() {
        let record = UploadRecord::pending(Uuid::nil(), request(), "uploads/u1/k".to_string());
        let event = ProcessingEvent::from(&record);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["uploadId"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["ownerId"], "u1");
        assert_eq!(json["storageKey"], "uploads/u1/k");
        assert_eq!(json["fileName"], "a b.png");
        assert_eq!(json["contentType"], "image/png");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_new_upload_deserializes_camel_case() {
        let json = r#"{
            "ownerId": "u1",
            "fileName": "a b.png",
            "contentType": "image/png",
            "fileSize": 100
        }"#;

        let request: NewUpload = serde_json::from_str(json).unwrap();
        assert_eq!(request.owner_id, "u1");
        assert_eq!(request.file_size, 100);
        assert!(request.caption.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(request().validate(None).is_ok());
        assert!(request().validate(Some(100)).is_ok());

        let too_big = request().validate(Some(99));
        assert!(matches!(too_big, Err(UploadError::InvalidRequest(_))));

        let mut blank = request();
        blank.owner_id = "  ".to_string();
        assert!(matches!(blank.validate(None), Err(UploadError::InvalidRequest(_))));

        let mut empty = request();
        empty.file_size = 0;
        assert!(matches!(empty.validate(None), Err(UploadError::InvalidRequest(_))));
    }

    #[test]
    fn test_blank_result_url() {
        assert!(ResultUrl::new("").is_blank());
        assert!(ResultUrl::new(" \t").is_blank());
        assert!(!ResultUrl::new("https://r/x-thumb.jpg").is_blank());
    }
}
