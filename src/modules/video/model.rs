use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "video_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoState {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl VideoState {
    /// Whether a record may move from `self` to `next`.
    ///
    /// `Processing -> Processing` and `Failed -> Processing` cover queue
    /// redelivery of a job whose previous attempt crashed or failed.
    pub fn can_transition_to(self, next: VideoState) -> bool {
        use VideoState::*;
        matches!(
            (self, next),
            (Uploaded, Queued)
                | (Completed, Queued)
                | (Failed, Queued)
                | (Queued, Processing)
                | (Processing, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Queued, Failed)
                | (Processing, Failed)
        )
    }

    /// A job for this record is waiting in the queue or running.
    pub fn is_in_flight(self) -> bool {
        matches!(self, VideoState::Queued | VideoState::Processing)
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VideoState::Uploaded => "UPLOADED",
            VideoState::Queued => "QUEUED",
            VideoState::Processing => "PROCESSING",
            VideoState::Completed => "COMPLETED",
            VideoState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: VideoState,
    pub to: VideoState,
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub video_id: Uuid,
    pub owner_id: Option<String>,
    pub title: String,
    pub original_format: String,
    pub size_bytes: i64,
    pub duration_seconds: Option<f64>,
    pub original_object_key: String,
    pub transcoded_object_key: Option<String>,
    pub transcoded_format: Option<String>,
    /// Target of the conversion most recently requested. A job message for
    /// any other format is stale.
    pub requested_format: Option<String>,
    pub thumbnail_object_key: Option<String>,
    pub state: VideoState,
    pub progress: i16,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}

impl VideoRecord {
    fn transition(&mut self, next: VideoState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Restart the conversion cycle for `format`. Any previous output is
    /// detached from the record; the caller owns removing the old object.
    pub fn mark_queued(&mut self, format: &str) -> Result<Option<String>, InvalidTransition> {
        self.transition(VideoState::Queued)?;
        self.progress = 0;
        self.transcoded_format = None;
        self.requested_format = Some(format.to_string());
        Ok(self.transcoded_object_key.take())
    }

    /// Whether a job for `format` belongs to the latest conversion request.
    pub fn is_requested(&self, format: &str) -> bool {
        self.requested_format.as_deref() == Some(format)
    }

    /// In flight, but untouched for longer than `window`: whoever owned the
    /// job is gone.
    pub fn is_abandoned(&self, window: Duration, now: OffsetDateTime) -> bool {
        self.state.is_in_flight() && now - self.updated_at > window
    }

    pub fn mark_processing(&mut self) -> Result<(), InvalidTransition> {
        self.transition(VideoState::Processing)?;
        self.progress = 0;
        Ok(())
    }

    pub fn mark_completed(&mut self, key: String, format: &str) -> Result<(), InvalidTransition> {
        self.transition(VideoState::Completed)?;
        self.transcoded_object_key = Some(key);
        self.transcoded_format = Some(format.to_string());
        self.progress = 100;
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<(), InvalidTransition> {
        self.transition(VideoState::Failed)?;
        self.transcoded_object_key = None;
        self.transcoded_format = None;
        Ok(())
    }
}

pub fn original_key(video_id: Uuid, extension: &str) -> String {
    format!("originals/{}.{}", video_id, extension)
}

pub fn transcoded_key(video_id: Uuid, format: &str) -> String {
    format!("transcoded/{}.{}", video_id, format)
}

pub fn thumbnail_key(video_id: Uuid) -> String {
    format!("thumbnails/{}.jpg", video_id)
}

#[cfg(test)]
pub(crate) fn sample_record() -> VideoRecord {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    VideoRecord {
        video_id: id,
        owner_id: None,
        title: "clip".to_string(),
        original_format: "mov".to_string(),
        size_bytes: 1024,
        duration_seconds: Some(10.0),
        original_object_key: original_key(id, "mov"),
        transcoded_object_key: None,
        transcoded_format: None,
        requested_format: None,
        thumbnail_object_key: None,
        state: VideoState::Uploaded,
        progress: 0,
        created_at: now,
        updated_at: now,
    }
}
