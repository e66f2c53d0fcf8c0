use super::dto::{ConvertRequest, ReformatRequest, UploadForm};
use super::events::{JobMessage, ProgressEvent};
use super::formats::TargetFormat;
use super::model::{VideoRecord, VideoState};
use super::service::{VideoError, VideoService};
use crate::common::response::{ApiError, ApiSuccess, ErrorBody, MessageResponse};
use crate::common::upload::stage_field;
use crate::config::settings::DispatchMode;
use crate::middleware::identity::Caller;
use crate::modules::video::repository::VideoStore;
use crate::state::AppState;
use crate::workers::progress::ChannelSink;
use crate::workers::transcoder::run_job;
use axum::{
    body::Body,
    extract::{Extension, Multipart, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

type ProgressStream = BoxStream<'static, Result<Event, Infallible>>;

/// Upload Video
/// Multipart upload; the `video` field carries the file.
#[utoipa::path(
    post,
    path = "/videos/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Video uploaded", body = VideoRecord),
        (status = 400, description = "Rejected file", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn upload_video(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut staged = None;
    let mut title = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(ApiError(e.body_text(), e.status())),
        };

        match field.name().unwrap_or("") {
            "video" if staged.is_none() => {
                let upload = stage_field(
                    field,
                    &state.jobs.scratch,
                    state.config.media.max_upload_bytes,
                )
                .await
                .map_err(VideoError::from)?;
                staged = Some(upload);
            }
            "title" => {
                title = field.text().await.ok();
            }
            _ => {}
        }
    }

    let staged = staged.ok_or_else(|| {
        ApiError(
            "No video field found in multipart request".to_string(),
            StatusCode::BAD_REQUEST,
        )
    })?;

    info!("Starting upload: {}", staged.file_name);
    let owner = caller.owner_id().map(str::to_string);
    let record = VideoService::upload(&state, staged, title, owner).await?;

    Ok(ApiSuccess(record, StatusCode::CREATED))
}

/// Convert Video
/// Streams progress as `text/event-stream`; ends after `100` or `error`.
#[utoipa::path(
    post,
    path = "/videos/convert",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Progress stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "Video not found", body = ErrorBody),
        (status = 409, description = "Conversion already running", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn convert_video(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Result<Response, ApiError> {
    req.validate()
        .map_err(|e| ApiError(e.to_string(), StatusCode::BAD_REQUEST))?;
    start_conversion(state, req.video_id, &req.format).await
}

/// Reformat Video
/// Same as convert, with the video id in the path.
#[utoipa::path(
    post,
    path = "/videos/reformat/{id}",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    request_body = ReformatRequest,
    responses(
        (status = 200, description = "Progress stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "Video not found", body = ErrorBody),
        (status = 409, description = "Conversion already running", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn reformat_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReformatRequest>,
) -> Result<Response, ApiError> {
    req.validate()
        .map_err(|e| ApiError(e.to_string(), StatusCode::BAD_REQUEST))?;
    start_conversion(state, id, &req.format).await
}

async fn start_conversion(
    state: AppState,
    video_id: Uuid,
    format: &str,
) -> Result<Response, ApiError> {
    let job = VideoService::request_conversion(&state, video_id, format).await?;

    let events = match state.config.dispatch_mode {
        DispatchMode::Queue => {
            VideoService::enqueue(&state, &job).await?;
            poll_progress(
                state.store.clone(),
                video_id,
                job.target_format.clone(),
                state.config.media.progress_poll,
            )
        }
        DispatchMode::Inline => run_inline(&state, job),
    };

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn to_event(event: &ProgressEvent) -> Result<Event, Infallible> {
    Ok(Event::default().data(event.wire_value()))
}

/// Drives the worker in this process. The job is cancelled when the client
/// goes away, since the stream (and its guard) is dropped with the connection.
fn run_inline(state: &AppState, job: JobMessage) -> ProgressStream {
    let video_id = job.video_id;
    let (tx, rx) = mpsc::channel::<ProgressEvent>(32);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let sink = ChannelSink(tx);
        let _ = run_job(&jobs, &job, &sink, &cancel).await;
    });

    struct Relay {
        rx: mpsc::Receiver<ProgressEvent>,
        _guard: DropGuard,
        done: bool,
    }

    let relay = Relay {
        rx,
        _guard: guard,
        done: false,
    };

    stream::unfold(relay, move |mut relay| async move {
        if relay.done {
            return None;
        }
        // A worker that vanished without a terminal event counts as failed.
        let event = relay
            .rx
            .recv()
            .await
            .unwrap_or(ProgressEvent::Error { video_id });
        relay.done = event.is_terminal();
        Some((to_event(&event), relay))
    })
    .boxed()
}

/// Consecutive store errors after which the relay gives up.
const MAX_POLL_FAILURES: u32 = 5;

/// Relays progress persisted by an out-of-process worker for the conversion
/// to `format`.
fn poll_progress(
    store: Arc<dyn VideoStore>,
    video_id: Uuid,
    format: String,
    every: Duration,
) -> ProgressStream {
    struct Poll {
        store: Arc<dyn VideoStore>,
        format: String,
        last: Option<u8>,
        failures: u32,
        done: bool,
        first: bool,
    }

    let poll = Poll {
        store,
        format,
        last: None,
        failures: 0,
        done: false,
        first: true,
    };

    stream::unfold(poll, move |mut poll| async move {
        if poll.done {
            return None;
        }

        loop {
            if !poll.first {
                tokio::time::sleep(every).await;
            }
            poll.first = false;

            let record = match poll.store.get(video_id).await {
                Ok(record) => {
                    poll.failures = 0;
                    record
                }
                Err(e) => {
                    poll.failures += 1;
                    warn!(%video_id, failures = poll.failures, "Progress poll failed: {}", e);
                    if poll.failures < MAX_POLL_FAILURES {
                        continue;
                    }
                    poll.done = true;
                    return Some((to_event(&ProgressEvent::Error { video_id }), poll));
                }
            };

            let event = match record {
                Some(r)
                    if r.state == VideoState::Completed
                        && r.transcoded_format.as_deref() == Some(poll.format.as_str()) =>
                {
                    ProgressEvent::Percent {
                        video_id,
                        percent: 100,
                    }
                }
                Some(r) if r.state.is_in_flight() && r.is_requested(&poll.format) => {
                    let percent = r.progress.clamp(0, 99) as u8;
                    if poll.last.is_some_and(|last| percent <= last) {
                        continue;
                    }
                    poll.last = Some(percent);
                    ProgressEvent::Percent { video_id, percent }
                }
                // Failed, deleted, or superseded by another request.
                _ => ProgressEvent::Error { video_id },
            };

            poll.done = event.is_terminal();
            return Some((to_event(&event), poll));
        }
    })
    .boxed()
}

/// Download Video
/// Streams the transcoded file as an attachment.
#[utoipa::path(
    get,
    path = "/videos/download/{id}",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Transcoded file", content_type = "application/octet-stream"),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn download_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (record, body) = VideoService::download(&state, id).await?;

    let extension = record.transcoded_format.clone().unwrap_or_default();
    let content_type = extension
        .parse::<TargetFormat>()
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream");
    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        sanitize_filename(&record.title),
        extension
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition);

    if let Some(len) = body.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    builder
        .body(Body::from_stream(body.stream))
        .map_err(|e| ApiError(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR))
}

fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

/// Delete Video
#[utoipa::path(
    delete,
    path = "/videos/delete/{id}",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Video deleted", body = MessageResponse),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    VideoService::delete(&state, id).await?;
    Ok(ApiSuccess(
        MessageResponse::new("Video deleted successfully"),
        StatusCode::OK,
    ))
}

/// List Videos
/// Videos owned by the caller; anonymous callers see anonymous uploads.
#[utoipa::path(
    get,
    path = "/videos",
    responses(
        (status = 200, description = "Caller's videos, newest first", body = Vec<VideoRecord>),
        (status = 500, description = "Internal Server Error", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn list_videos(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let videos = VideoService::list(&state, caller.owner_id()).await?;
    Ok(ApiSuccess(videos, StatusCode::OK))
}

#[utoipa::path(
    get,
    path = "/videos/{id}",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Get Video", body = VideoRecord),
        (status = 404, description = "Not Found", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let video = VideoService::get(&state, id).await?;
    Ok(ApiSuccess(video, StatusCode::OK))
}
