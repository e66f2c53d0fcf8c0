use super::events::JobMessage;
use super::formats::TargetFormat;
use super::model::{VideoRecord, VideoState, original_key, thumbnail_key};
use crate::common::response::ApiError;
use crate::common::upload::{StageError, StagedUpload};
use crate::infrastructure::media::ffmpeg::EngineError;
use crate::infrastructure::storage::ObjectBody;
use crate::state::AppState;
use axum::http::StatusCode;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StageError> for VideoError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::Invalid(msg) => VideoError::Validation(msg),
            StageError::TooLarge(_) => VideoError::PayloadTooLarge(err.to_string()),
            StageError::Stream(_) => VideoError::Validation(err.to_string()),
            StageError::Io(e) => VideoError::Internal(e.into()),
        }
    }
}

impl From<VideoError> for ApiError {
    fn from(err: VideoError) -> Self {
        let status = match &err {
            VideoError::Validation(_) => StatusCode::BAD_REQUEST,
            VideoError::NotFound(_) => StatusCode::NOT_FOUND,
            VideoError::Conflict(_) => StatusCode::CONFLICT,
            VideoError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            VideoError::Internal(e) => {
                error!("Internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(err.to_string(), status)
    }
}

fn not_found() -> VideoError {
    VideoError::NotFound("Video not found".to_string())
}

pub struct VideoService;

impl VideoService {
    /// Stores a staged upload and creates its record in `UPLOADED`.
    ///
    /// The file is probed before anything is written, so an unreadable file
    /// leaves no trace. A missing thumbnail never fails the upload.
    pub async fn upload(
        state: &AppState,
        staged: StagedUpload,
        title: Option<String>,
        owner_id: Option<String>,
    ) -> Result<VideoRecord, VideoError> {
        let engine = &state.jobs.engine;
        let duration = engine
            .probe_duration(&staged.path)
            .await
            .map_err(|e| match e {
                EngineError::Spawn { .. } | EngineError::Io(_) => VideoError::Internal(e.into()),
                other => {
                    warn!("Probe rejected {}: {}", staged.file_name, other);
                    VideoError::Validation(format!(
                        "'{}' is not a readable video file",
                        staged.file_name
                    ))
                }
            })?;

        let video_id = Uuid::new_v4();
        let key = original_key(video_id, &staged.extension);
        state
            .objects
            .put_file(&key, &staged.path, &staged.content_type)
            .await?;

        let thumbnail = Self::store_thumbnail(state, video_id, &staged, duration).await;

        let now = OffsetDateTime::now_utc();
        let record = VideoRecord {
            video_id,
            owner_id,
            title: title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| staged.stem()),
            original_format: staged.extension.clone(),
            size_bytes: staged.size as i64,
            duration_seconds: duration,
            original_object_key: key,
            transcoded_object_key: None,
            transcoded_format: None,
            requested_format: None,
            thumbnail_object_key: thumbnail,
            state: VideoState::Uploaded,
            progress: 0,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = state.store.create(&record).await {
            Self::remove_objects(state, &record).await.ok();
            return Err(e.into());
        }

        info!(video_id = %video_id, "📼 Video uploaded ({} bytes)", record.size_bytes);
        Ok(record)
    }

    async fn store_thumbnail(
        state: &AppState,
        video_id: Uuid,
        staged: &StagedUpload,
        duration: Option<f64>,
    ) -> Option<String> {
        let frame = staged.path.with_file_name("thumbnail.jpg");
        if let Err(e) = state.jobs.engine.thumbnail(&staged.path, &frame, duration).await {
            warn!(%video_id, "Thumbnail skipped: {}", e);
            return None;
        }

        let key = thumbnail_key(video_id);
        match state.objects.put_file(&key, &frame, "image/jpeg").await {
            Ok(()) => Some(key),
            Err(e) => {
                warn!(%video_id, "Thumbnail upload failed: {}", e);
                None
            }
        }
    }

    /// Validates a conversion request and moves the record to `QUEUED`.
    /// Returns the job to hand to a worker.
    ///
    /// A record stuck in flight for longer than the visibility timeout is
    /// failed and requeued instead of answering 409.
    pub async fn request_conversion(
        state: &AppState,
        video_id: Uuid,
        format: &str,
    ) -> Result<JobMessage, VideoError> {
        let target: TargetFormat = format
            .parse()
            .map_err(|e: super::formats::UnsupportedFormat| VideoError::Validation(e.to_string()))?;

        let mut record = Self::get(state, video_id).await?;

        if record.original_format.eq_ignore_ascii_case(target.extension()) {
            return Err(VideoError::Validation(format!(
                "Video is already in {} format",
                target.extension()
            )));
        }
        if record.state.is_in_flight() {
            let window = state.config.queue.visibility_timeout;
            if !record.is_abandoned(window, OffsetDateTime::now_utc()) {
                return Err(VideoError::Conflict(format!(
                    "Video is already being converted (state {})",
                    record.state
                )));
            }
            warn!(%video_id, state = %record.state, "Taking over an abandoned conversion");
            record
                .mark_failed()
                .map_err(|e| VideoError::Conflict(e.to_string()))?;
        }

        let source_url = state.objects.signed_url(&record.original_object_key).await?;

        let previous = record
            .mark_queued(target.extension())
            .map_err(|e| VideoError::Conflict(e.to_string()))?;
        state.store.update(&record).await?;

        if let Some(old) = previous {
            if let Err(e) = state.objects.delete(&old).await {
                warn!(%video_id, "Failed to remove previous output {}: {}", old, e);
            }
        }

        info!(%video_id, format = target.extension(), "Conversion queued");
        Ok(JobMessage {
            video_id,
            source_url,
            target_format: target.extension().to_string(),
        })
    }

    /// Publishes the job. If the queue refuses it the record is failed, so a
    /// later request is not blocked by an orphaned `QUEUED` state.
    pub async fn enqueue(state: &AppState, job: &JobMessage) -> Result<(), VideoError> {
        if let Err(e) = state.queue.send(&job.encode()).await {
            if let Ok(Some(mut record)) = state.store.get(job.video_id).await {
                if record.mark_failed().is_ok() {
                    state.store.update(&record).await.ok();
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get(state: &AppState, video_id: Uuid) -> Result<VideoRecord, VideoError> {
        state.store.get(video_id).await?.ok_or_else(not_found)
    }

    pub async fn list(state: &AppState, owner_id: Option<&str>) -> Result<Vec<VideoRecord>, VideoError> {
        Ok(state.store.list_by_owner(owner_id).await?)
    }

    /// Opens the transcoded object of a completed record.
    pub async fn download(
        state: &AppState,
        video_id: Uuid,
    ) -> Result<(VideoRecord, ObjectBody), VideoError> {
        let record = Self::get(state, video_id).await?;

        let key = match (&record.state, &record.transcoded_object_key) {
            (VideoState::Completed, Some(key)) => key.clone(),
            _ => {
                return Err(VideoError::NotFound(
                    "Transcoded video not available".to_string(),
                ));
            }
        };

        let body = state
            .objects
            .get(&key)
            .await?
            .ok_or_else(|| VideoError::NotFound("Transcoded video not available".to_string()))?;

        Ok((record, body))
    }

    /// Removes every stored object of the record, then the record itself.
    pub async fn delete(state: &AppState, video_id: Uuid) -> Result<(), VideoError> {
        let record = Self::get(state, video_id).await?;

        Self::remove_objects(state, &record).await?;

        if !state.store.delete(video_id).await? {
            return Err(not_found());
        }
        info!(%video_id, "🗑️ Video deleted");
        Ok(())
    }

    async fn remove_objects(state: &AppState, record: &VideoRecord) -> Result<(), VideoError> {
        let keys = std::iter::once(&record.original_object_key)
            .chain(record.transcoded_object_key.iter())
            .chain(record.thumbnail_object_key.iter());

        for key in keys {
            state.objects.delete(key).await?;
        }
        Ok(())
    }
}
