use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit of work placed on the transcode queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    #[serde(alias = "id")]
    pub video_id: Uuid,
    #[serde(alias = "url")]
    pub source_url: String,
    #[serde(alias = "format")]
    pub target_format: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed job body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job source url is not a valid url: {0}")]
    SourceUrl(#[from] url::ParseError),
}

impl JobMessage {
    pub fn encode(&self) -> String {
        // Serializing a struct of strings and a uuid cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decodes a queue body, unwrapping one level of string encoding when a
    /// producer serialized an already-serialized payload.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let mut value: serde_json::Value = serde_json::from_str(body)?;
        if let serde_json::Value::String(inner) = &value {
            value = serde_json::from_str(inner)?;
        }
        let job: JobMessage = serde_json::from_value(value)?;
        url::Url::parse(&job.source_url)?;
        Ok(job)
    }
}

/// One percent-complete (or error) notification for a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Percent { video_id: Uuid, percent: u8 },
    Error { video_id: Uuid },
}

impl ProgressEvent {
    /// The stream ends after a `100` or an `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Percent { percent: 100, .. } | ProgressEvent::Error { .. }
        )
    }

    /// Value carried on the `data:` line of the event stream.
    pub fn wire_value(&self) -> String {
        match self {
            ProgressEvent::Percent { percent, .. } => percent.to_string(),
            ProgressEvent::Error { .. } => "error".to_string(),
        }
    }
}
