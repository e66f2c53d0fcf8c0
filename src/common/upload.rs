use crate::infrastructure::media::scratch::ScratchSpace;
use crate::modules::video::formats::{content_type_for_extension, validate_upload};
use axum::{extract::multipart::Field, http::StatusCode};
use futures_util::StreamExt;
use std::io;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Invalid(String),

    #[error("file exceeds the {0} byte upload limit")]
    TooLarge(u64),

    #[error("upload stream interrupted: {0}")]
    Stream(String),

    #[error("failed to stage upload: {0}")]
    Io(#[from] io::Error),
}

/// A validated upload written to local scratch. The directory is removed when
/// this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub content_type: String,
    pub size: u64,
    _dir: TempDir,
}

impl StagedUpload {
    /// File name without its extension, used as the default title.
    pub fn stem(&self) -> String {
        std::path::Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("untitled")
            .to_string()
    }
}

/// Checks the field against the allow-list, then streams it to scratch,
/// refusing anything past `max_bytes`. Nothing is written when validation
/// fails.
pub async fn stage_field(
    mut field: Field<'_>,
    scratch: &ScratchSpace,
    max_bytes: u64,
) -> Result<StagedUpload, StageError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let declared = field.content_type().map(str::to_string);
    let extension =
        validate_upload(&file_name, declared.as_deref()).map_err(StageError::Invalid)?;

    let dir = scratch.upload_dir()?;
    let path = dir.path().join(format!("source.{}", extension));
    let mut file = tokio::fs::File::create(&path).await?;
    let mut size: u64 = 0;

    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(StageError::TooLarge(max_bytes));
            }
            Err(e) => {
                error!("Stream error: {}", e);
                return Err(StageError::Stream(e.body_text()));
            }
        };

        size += chunk.len() as u64;
        if size > max_bytes {
            return Err(StageError::TooLarge(max_bytes));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if size == 0 {
        return Err(StageError::Invalid("Uploaded file is empty".to_string()));
    }

    info!("Staged upload {} ({} bytes)", file_name, size);
    Ok(StagedUpload {
        path,
        file_name,
        content_type: content_type_for_extension(&extension),
        extension,
        size,
        _dir: dir,
    })
}
