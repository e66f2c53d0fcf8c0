use crate::config::settings::MediaSettings;
use crate::infrastructure::media::ffmpeg::{EngineError, MediaEngine};
use crate::infrastructure::media::scratch::ScratchSpace;
use crate::infrastructure::storage::ObjectStore;
use crate::modules::video::events::{JobMessage, ProgressEvent};
use crate::modules::video::formats::{TargetFormat, UnsupportedFormat};
use crate::modules::video::model::{InvalidTransition, VideoRecord, VideoState, transcoded_key};
use crate::modules::video::repository::VideoStore;
use crate::workers::progress::ProgressSink;
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("video {0} no longer exists")]
    VideoNotFound(Uuid),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),

    #[error("job for video {video_id} is stale, record is {state}")]
    Stale { video_id: Uuid, state: VideoState },

    #[error("source download failed: {0}")]
    SourceUnavailable(String),

    #[error("source url rejected with status {0}")]
    SourceRejected(StatusCode),

    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(EngineError),

    #[error("publishing the result failed: {0}")]
    Publish(anyhow::Error),

    #[error("metadata store failed: {0}")]
    Store(anyhow::Error),

    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Redelivering the same message cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            JobError::VideoNotFound(_) | JobError::UnsupportedFormat(_) | JobError::Stale { .. }
        )
    }

    fn stale(video_id: Uuid, transition: InvalidTransition) -> Self {
        JobError::Stale {
            video_id,
            state: transition.from,
        }
    }
}

impl From<EngineError> for JobError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => JobError::Cancelled,
            other => JobError::Engine(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { object_key: String },
    /// A redelivered message whose result is already recorded.
    AlreadyCompleted,
}

/// Everything the worker needs; shared by the queue consumer and the inline
/// dispatch path.
pub struct TranscodeContext {
    pub store: Arc<dyn VideoStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub engine: MediaEngine,
    pub scratch: ScratchSpace,
    pub http: reqwest::Client,
}

impl TranscodeContext {
    pub fn new(
        store: Arc<dyn VideoStore>,
        objects: Arc<dyn ObjectStore>,
        settings: &MediaSettings,
    ) -> Self {
        Self {
            store,
            objects,
            engine: MediaEngine::new(settings),
            scratch: ScratchSpace::new(&settings.scratch_dir),
            http: reqwest::Client::new(),
        }
    }
}

/// Runs one job through FETCH, ENCODE, PUBLISH and FINALIZE.
///
/// On any failure a single `error` event is emitted and the record is left
/// `FAILED`. Scratch files are removed on every exit path, including
/// cancellation.
pub async fn run_job(
    ctx: &TranscodeContext,
    job: &JobMessage,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<JobOutcome, JobError> {
    let video_id = job.video_id;
    let span = info_span!("transcode", %video_id, format = %job.target_format);

    async move {
        match execute(ctx, job, sink, cancel).await {
            Ok(outcome) => {
                info!(?outcome, "Job finished");
                Ok(outcome)
            }
            Err(err) => {
                error!("Job failed: {}", err);
                sink.emit(ProgressEvent::Error { video_id }).await;
                if !matches!(err, JobError::Stale { .. }) {
                    mark_failed(ctx, video_id).await;
                }
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

async fn execute(
    ctx: &TranscodeContext,
    job: &JobMessage,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<JobOutcome, JobError> {
    let video_id = job.video_id;
    let format: TargetFormat = job.target_format.parse()?;

    let mut record = load(ctx, video_id).await?;
    if !record.is_requested(format.extension()) {
        return Err(JobError::Stale {
            video_id,
            state: record.state,
        });
    }
    if is_done(&record, format) {
        info!("Result already recorded, skipping duplicate delivery");
        sink.emit(ProgressEvent::Percent {
            video_id,
            percent: 100,
        })
        .await;
        return Ok(JobOutcome::AlreadyCompleted);
    }

    record
        .mark_processing()
        .map_err(|t| JobError::stale(video_id, t))?;
    ctx.store.update(&record).await.map_err(JobError::Store)?;

    let workdir = ctx.scratch.job_dir(video_id)?;
    let source = workdir
        .path()
        .join(format!("source.{}", record.original_format));
    let output = workdir
        .path()
        .join(format!("output.{}", format.extension()));

    info!("FETCH");
    until_cancelled(cancel, fetch_source(ctx, &job.source_url, &record, &source)).await??;

    info!("ENCODE");
    encode(ctx, video_id, format, &source, &output, sink, cancel).await?;

    info!("PUBLISH");
    let key = transcoded_key(video_id, format.extension());
    until_cancelled(
        cancel,
        ctx.objects.put_file(&key, &output, format.content_type()),
    )
    .await?
    .map_err(JobError::Publish)?;

    info!("FINALIZE");
    let outcome = finalize(ctx, video_id, format, key).await?;
    sink.emit(ProgressEvent::Percent {
        video_id,
        percent: 100,
    })
    .await;

    Ok(outcome)
}

fn is_done(record: &VideoRecord, format: TargetFormat) -> bool {
    record.state == VideoState::Completed
        && record.transcoded_format.as_deref() == Some(format.extension())
}

async fn load(ctx: &TranscodeContext, video_id: Uuid) -> Result<VideoRecord, JobError> {
    ctx.store
        .get(video_id)
        .await
        .map_err(JobError::Store)?
        .ok_or(JobError::VideoNotFound(video_id))
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, JobError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        out = fut => Ok(out),
    }
}

async fn fetch_source(
    ctx: &TranscodeContext,
    url: &str,
    record: &VideoRecord,
    dest: &Path,
) -> Result<(), JobError> {
    match download(&ctx.http, url, dest).await {
        Err(JobError::SourceRejected(status)) => {
            warn!(%status, "Source url rejected, signing a fresh one");
            let fresh = ctx
                .objects
                .signed_url(&record.original_object_key)
                .await
                .map_err(|e| JobError::SourceUnavailable(e.to_string()))?;
            download(&ctx.http, &fresh, dest).await
        }
        other => other,
    }
}

async fn download(http: &reqwest::Client, url: &str, dest: &Path) -> Result<(), JobError> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| JobError::SourceUnavailable(e.to_string()))?;

    let status = resp.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return Err(JobError::SourceRejected(status));
    }
    if !status.is_success() {
        return Err(JobError::SourceUnavailable(format!("status {}", status)));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| JobError::SourceUnavailable(e.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let size = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(JobError::SourceUnavailable(
            "downloaded source is empty".to_string(),
        ));
    }
    info!(bytes = size, "Source fetched");
    Ok(())
}

async fn encode(
    ctx: &TranscodeContext,
    video_id: Uuid,
    format: TargetFormat,
    source: &Path,
    output: &Path,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let profile = format.profile();

    let run = ctx.engine.transcode(source, output, &profile, cancel, tx);
    let relay = async {
        while let Some(percent) = rx.recv().await {
            sink.emit(ProgressEvent::Percent { video_id, percent }).await;
        }
    };

    let (result, ()) = tokio::join!(run, relay);
    result.map_err(JobError::from)
}

async fn finalize(
    ctx: &TranscodeContext,
    video_id: Uuid,
    format: TargetFormat,
    key: String,
) -> Result<JobOutcome, JobError> {
    let mut record = match load(ctx, video_id).await {
        Ok(record) => record,
        Err(err @ JobError::VideoNotFound(_)) => {
            // Deleted while encoding; drop what was just published.
            discard(ctx, &key).await;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    if is_done(&record, format) {
        return Ok(JobOutcome::AlreadyCompleted);
    }
    // Superseded by a newer request, or its result recorded by another job.
    if !record.is_requested(format.extension()) || record.state == VideoState::Completed {
        discard(ctx, &key).await;
        return Err(JobError::Stale {
            video_id,
            state: record.state,
        });
    }

    // A racing duplicate may have failed this record meanwhile; last write wins.
    if record.state != VideoState::Processing {
        record
            .mark_processing()
            .map_err(|t| JobError::stale(video_id, t))?;
    }
    record
        .mark_completed(key.clone(), format.extension())
        .map_err(|t| JobError::stale(video_id, t))?;
    ctx.store.update(&record).await.map_err(JobError::Store)?;

    Ok(JobOutcome::Completed { object_key: key })
}

async fn discard(ctx: &TranscodeContext, key: &str) {
    if let Err(e) = ctx.objects.delete(key).await {
        warn!("Failed to remove unreferenced object {}: {}", key, e);
    }
}

async fn mark_failed(ctx: &TranscodeContext, video_id: Uuid) {
    let mut record = match ctx.store.get(video_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(e) => {
            error!("Could not load record to mark it failed: {}", e);
            return;
        }
    };

    if let Err(e) = record.mark_failed() {
        warn!("Leaving record as is: {}", e);
        return;
    }
    if let Err(e) = ctx.store.update(&record).await {
        error!("Could not persist FAILED state: {}", e);
    }
}
