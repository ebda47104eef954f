use crate::error::{bounded, UploadError};
use crate::issuer::CredentialIssuer;
use crate::model::{NewUpload, UploadDescriptor, UploadRecord};
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Creates PENDING records and hands out upload credentials
#[derive(Clone)]
pub struct IntakeService {
    issuer: Arc<dyn CredentialIssuer>,
    store: Arc<dyn RecordStore>,
    issuer_timeout: Duration,
    store_timeout: Duration,
    max_upload_bytes: Option<u64>,
}

impl IntakeService {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        store: Arc<dyn RecordStore>,
        issuer_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            issuer,
            store,
            issuer_timeout,
            store_timeout,
            max_upload_bytes: None,
        }
    }

    /// Reject intake requests whose declared size exceeds `limit`
    pub fn with_max_upload_bytes(mut self, limit: Option<u64>) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Start an upload: issue a credential, then persist the PENDING record.
    ///
    /// No record exists if issuance fails. If persistence fails the credential
    /// is abandoned; it expires on its own.
    #[instrument(skip(self, request), fields(owner_id = %request.owner_id, file_name = %request.file_name))]
    pub async fn initiate(&self, request: NewUpload) -> Result<UploadDescriptor, UploadError> {
        request.validate(self.max_upload_bytes)?;

        let id = Uuid::new_v4();

        let credential = bounded(
            self.issuer_timeout,
            "issue upload credential",
            UploadError::IssuerUnavailable,
            self.issuer
                .issue(&request.owner_id, &request.file_name, &request.content_type),
        )
        .await?;

        let record = UploadRecord::pending(id, request, credential.storage_key.clone());

        if let Err(e) = bounded(
            self.store_timeout,
            "create upload",
            UploadError::StoreFailure,
            self.store.create(&record),
        )
        .await
        {
            warn!(
                upload_id = %id,
                storage_key = %credential.storage_key,
                error = %e,
                "Upload record not persisted; abandoning issued credential"
            );
            return Err(match e {
                UploadError::StoreFailure(_) => e,
                other => UploadError::StoreFailure(other.to_string()),
            });
        }

        metrics::counter!("uploads.initiated").increment(1);
        info!(upload_id = %id, storage_key = %credential.storage_key, "Upload initiated");

        Ok(UploadDescriptor {
            id,
            upload_credential: credential.url,
            storage_key: credential.storage_key,
            expiration_minutes: self.issuer.expiration().as_secs() / 60,
            expires_at: credential.expires_at,
        })
    }
}
