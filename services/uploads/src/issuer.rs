use crate::config::S3Config;
use crate::error::UploadError;
use crate::model::IssuedCredential;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Issues time-scoped write credentials for object storage.
///
/// Issuance has no side effects: nothing is reserved and nothing is checked
/// for existence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(
        &self,
        owner_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> Result<IssuedCredential, UploadError>;

    /// Lifetime of every credential this issuer hands out
    fn expiration(&self) -> Duration;
}

/// Presigned `PUT` URLs against an S3 bucket
pub struct S3CredentialIssuer {
    client: S3Client,
    bucket: String,
    expiration: Duration,
}

impl S3CredentialIssuer {
    /// Build an issuer from the ambient AWS configuration
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            expiration_minutes = config.presigned_url_expiration_minutes,
            "S3 credential issuer initialized"
        );

        Self::from_client(
            client,
            config.bucket.clone(),
            config.presigned_url_expiration(),
        )
    }

    pub fn from_client(client: S3Client, bucket: String, expiration: Duration) -> Self {
        Self {
            client,
            bucket,
            expiration,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl CredentialIssuer for S3CredentialIssuer {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn issue(
        &self,
        owner_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> Result<IssuedCredential, UploadError> {
        let storage_key = storage_key(owner_id, file_name);

        let presigning_config = PresigningConfig::expires_in(self.expiration)
            .map_err(|e| UploadError::IssuerUnavailable(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&storage_key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| UploadError::IssuerUnavailable(e.to_string()))?;

        let lifetime = chrono::Duration::from_std(self.expiration)
            .map_err(|e| UploadError::IssuerUnavailable(e.to_string()))?;

        debug!(storage_key = %storage_key, "Upload credential issued");

        Ok(IssuedCredential {
            url: presigned.uri().to_string(),
            storage_key,
            expires_at: Utc::now() + lifetime,
        })
    }

    fn expiration(&self) -> Duration {
        self.expiration
    }
}

/// Object key for a new upload.
/// Format: uploads/{owner}/{epoch_millis}_{uuid}_{file_name}
///
/// The random component keeps keys unique across identical requests.
pub fn storage_key(owner_id: &str, file_name: &str) -> String {
    format!(
        "uploads/{}/{}_{}_{}",
        sanitize_component(owner_id),
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        sanitize_component(file_name)
    )
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`; never yields a
/// traversal segment.
pub fn sanitize_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{Credentials, Region};

    fn offline_issuer() -> S3CredentialIssuer {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
            .build();

        S3CredentialIssuer::from_client(
            S3Client::from_conf(config),
            "uploads".to_string(),
            Duration::from_secs(15 * 60),
        )
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("a b.png"), "a_b.png");
        assert_eq!(sanitize_component("u1"), "u1");
        assert_eq!(sanitize_component("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_component("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("."), "_");
        assert_eq!(sanitize_component(""), "_");
    }

    #[test]
    fn test_storage_key_format() {
        let key = storage_key("u1", "a b.png");
        let parts: Vec<&str> = key.splitn(3, '/').collect();

        assert_eq!(parts[0], "uploads");
        assert_eq!(parts[1], "u1");
        assert!(parts[2].ends_with("_a_b.png"));

        let (millis, rest) = parts[2].split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert!(Uuid::parse_str(&rest[..36]).is_ok());
    }

    #[test]
    fn test_storage_keys_are_unique() {
        let a = storage_key("u1", "a.png");
        let b = storage_key("u1", "a.png");
        assert_ne!(a, b);
    }

    #[test]
    fn test_owner_cannot_escape_prefix() {
        let key = storage_key("../../admin", "x.png");
        assert!(key.starts_with("uploads/.._.._admin/"));
        assert_eq!(key.matches('/').count(), 2);
    }

    #[tokio::test]
    async fn test_presigned_put_is_scoped_to_key() {
        let issuer = offline_issuer();
        let before = Utc::now();

        let credential = issuer.issue("u1", "a b.png", "image/png").await.unwrap();

        assert!(credential.storage_key.starts_with("uploads/u1/"));
        assert!(credential.url.contains(&credential.storage_key));
        assert!(credential.url.contains("X-Amz-Signature="));
        assert!(credential.url.contains("X-Amz-Expires=900"));
        assert!(credential.expires_at >= before + chrono::Duration::minutes(15));
        assert_eq!(issuer.expiration(), Duration::from_secs(900));
    }
}
