use super::RecordStore;
use crate::config::DatabaseConfig;
use crate::error::UploadError;
use crate::model::{UploadRecord, UploadStatus};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, owner_id, file_name, content_type, declared_size,
           storage_key, caption, status, result_url, created_at, updated_at
    FROM uploads
"#;

/// Row shape of the `uploads` table
#[derive(Debug, Clone, FromRow)]
struct UploadRow {
    id: Uuid,
    owner_id: String,
    file_name: String,
    content_type: String,
    declared_size: i64,
    storage_key: String,
    caption: Option<String>,
    status: String,
    result_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = UploadError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        Ok(UploadRecord {
            id: row.id,
            owner_id: row.owner_id,
            file_name: row.file_name,
            content_type: row.content_type,
            declared_size: row.declared_size,
            storage_key: row.storage_key,
            caption: row.caption,
            status: row.status.parse()?,
            result_url: row.result_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Record store backed by PostgreSQL
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Connect a pool using the database settings
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("database.url is not configured")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self, record), fields(upload_id = %record.id, storage_key = %record.storage_key))]
    async fn create(&self, record: &UploadRecord) -> Result<(), UploadError> {
        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, owner_id, file_name, content_type, declared_size,
                storage_key, caption, status, result_url, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(&record.file_name)
        .bind(&record.content_type)
        .bind(record.declared_size)
        .bind(&record.storage_key)
        .bind(&record.caption)
        .bind(record.status.as_str())
        .bind(&record.result_url)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Upload record inserted");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, UploadError> {
        let row = sqlx::query_as::<_, UploadRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(UploadRecord::try_from).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UploadRecord>, UploadError> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "{SELECT_COLUMNS} WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UploadRecord::try_from).collect()
    }

    #[instrument(skip(self, result_url), fields(upload_id = %id, from = %expected, to = %next))]
    async fn update_status(
        &self,
        id: Uuid,
        expected: UploadStatus,
        next: UploadStatus,
        result_url: Option<String>,
    ) -> Result<Option<UploadRecord>, UploadError> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            UPDATE uploads
            SET status = $3, result_url = $4, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, owner_id, file_name, content_type, declared_size,
                      storage_key, caption, status, result_url, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(result_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UploadRecord::try_from).transpose()
    }

    async fn ping(&self) -> Result<(), UploadError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> UploadRow {
        let now = Utc::now();
        UploadRow {
            id: Uuid::new_v4(),
            owner_id: "u1".to_string(),
            file_name: "a b.png".to_string(),
            content_type: "image/png".to_string(),
            declared_size: 100,
            storage_key: "uploads/u1/1_x_a_b.png".to_string(),
            caption: None,
            status: status.to_string(),
            result_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion() {
        let record = UploadRecord::try_from(row("PROCESSING")).unwrap();
        assert_eq!(record.status, UploadStatus::Processing);
        assert_eq!(record.owner_id, "u1");
    }

    #[test]
    fn test_row_with_unknown_status_is_store_failure() {
        let result = UploadRecord::try_from(row("ARCHIVED"));
        assert!(matches!(result, Err(UploadError::StoreFailure(_))));
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let config = DatabaseConfig::default();
        assert!(PostgresRecordStore::connect(&config).await.is_err());
    }
}
