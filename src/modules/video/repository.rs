use super::model::VideoRecord;
use crate::infrastructure::db::pool::DbPool;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Metadata store for video records, keyed by `video_id`.
///
/// Writes are last-write-wins; callers read, transition, and write back.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn create(&self, record: &VideoRecord) -> Result<()>;
    async fn get(&self, video_id: Uuid) -> Result<Option<VideoRecord>>;
    /// `None` lists anonymous uploads.
    async fn list_by_owner(&self, owner_id: Option<&str>) -> Result<Vec<VideoRecord>>;
    async fn update(&self, record: &VideoRecord) -> Result<()>;
    async fn set_progress(&self, video_id: Uuid, percent: u8) -> Result<()>;
    /// Returns whether a record was removed.
    async fn delete(&self, video_id: Uuid) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgVideoStore {
    pool: DbPool,
}

impl PgVideoStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn create(&self, record: &VideoRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (
                video_id, owner_id, title, original_format, size_bytes, duration_seconds,
                original_object_key, transcoded_object_key, transcoded_format,
                requested_format, thumbnail_object_key, state, progress, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record.video_id)
        .bind(&record.owner_id)
        .bind(&record.title)
        .bind(&record.original_format)
        .bind(record.size_bytes)
        .bind(record.duration_seconds)
        .bind(&record.original_object_key)
        .bind(&record.transcoded_object_key)
        .bind(&record.transcoded_format)
        .bind(&record.requested_format)
        .bind(&record.thumbnail_object_key)
        .bind(record.state)
        .bind(record.progress)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, video_id: Uuid) -> Result<Option<VideoRecord>> {
        let record = sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE video_id = $1")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_by_owner(&self, owner_id: Option<&str>) -> Result<Vec<VideoRecord>> {
        let records = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT * FROM videos
            WHERE owner_id IS NOT DISTINCT FROM $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn update(&self, record: &VideoRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE videos
            SET title = $2,
                transcoded_object_key = $3,
                transcoded_format = $4,
                requested_format = $5,
                thumbnail_object_key = $6,
                state = $7,
                progress = $8,
                updated_at = $9
            WHERE video_id = $1
            "#,
        )
        .bind(record.video_id)
        .bind(&record.title)
        .bind(&record.transcoded_object_key)
        .bind(&record.transcoded_format)
        .bind(&record.requested_format)
        .bind(&record.thumbnail_object_key)
        .bind(record.state)
        .bind(record.progress)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_progress(&self, video_id: Uuid, percent: u8) -> Result<()> {
        // GREATEST keeps persisted progress non-decreasing under racing writers.
        sqlx::query(
            r#"
            UPDATE videos
            SET progress = GREATEST(progress, $2), updated_at = NOW()
            WHERE video_id = $1 AND state = 'PROCESSING'
            "#,
        )
        .bind(video_id)
        .bind(i16::from(percent))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, video_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM videos WHERE video_id = $1")
            .bind(video_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
