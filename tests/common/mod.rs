#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use video_transcoder::config::settings::{
    AppConfig, DispatchMode, MediaSettings, QueueSettings,
};
use video_transcoder::infrastructure::queue::{JobQueue, QueueMessage};
use video_transcoder::infrastructure::storage::{ObjectBody, ObjectStore};
use video_transcoder::modules::video::events::ProgressEvent;
use video_transcoder::modules::video::model::{VideoRecord, VideoState, original_key};
use video_transcoder::modules::video::repository::VideoStore;
use video_transcoder::state::AppState;
use video_transcoder::workers::progress::ProgressSink;

/// First bytes of an ISO base media (mp4) file.
pub const MP4_MAGIC: &[u8] = b"\x00\x00\x00\x18ftypisom";

// ---------- metadata store ----------

#[derive(Default)]
pub struct MemoryVideoStore {
    records: Mutex<HashMap<Uuid, VideoRecord>>,
    unreachable: AtomicBool,
}

impl MemoryVideoStore {
    /// Makes every later `get` fail, as if the database went away.
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<VideoRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn create(&self, record: &VideoRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.video_id, record.clone());
        Ok(())
    }

    async fn get(&self, video_id: Uuid) -> Result<Option<VideoRecord>> {
        if self.unreachable.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(self.snapshot(video_id))
    }

    async fn list_by_owner(&self, owner_id: Option<&str>) -> Result<Vec<VideoRecord>> {
        let mut found: Vec<VideoRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.owner_id.as_deref() == owner_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn update(&self, record: &VideoRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(slot) = records.get_mut(&record.video_id) {
            *slot = record.clone();
        }
        Ok(())
    }

    async fn set_progress(&self, video_id: Uuid, percent: u8) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(r) = records.get_mut(&video_id) {
            if r.state == VideoState::Processing {
                r.progress = r.progress.max(percent as i16);
            }
        }
        Ok(())
    }

    async fn delete(&self, video_id: Uuid) -> Result<bool> {
        Ok(self.records.lock().unwrap().remove(&video_id).is_some())
    }
}

// ---------- object store ----------

type Objects = Arc<Mutex<HashMap<String, (Bytes, String)>>>;

/// Object store kept in memory. Signed urls point at a loopback HTTP server
/// that serves the same objects; `/expired/...` always answers 403.
pub struct MemoryObjectStore {
    objects: Objects,
    base_url: String,
}

impl MemoryObjectStore {
    pub async fn start() -> Arc<Self> {
        let objects: Objects = Arc::default();

        let app = Router::new()
            .route("/objects/{*key}", get(serve_object))
            .route("/expired/{*key}", get(|| async { StatusCode::FORBIDDEN }))
            .with_state(objects.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Arc::new(Self {
            objects,
            base_url: format!("http://{}", addr),
        })
    }

    pub fn insert(&self, key: &str, bytes: &[u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (Bytes::copy_from_slice(bytes), content_type.to_string()),
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn bytes(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn expired_url(&self, key: &str) -> String {
        format!("{}/expired/{}", self.base_url, key)
    }
}

async fn serve_object(State(objects): State<Objects>, UrlPath(key): UrlPath<String>) -> Response {
    match objects.lock().unwrap().get(&key) {
        Some((bytes, _)) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        self.insert(key, &bytes, content_type);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ObjectBody>> {
        let Some(bytes) = self.bytes(key) else {
            return Ok(None);
        };
        Ok(Some(ObjectBody {
            content_length: Some(bytes.len() as i64),
            stream: futures_util::stream::once(async move { Ok::<_, std::io::Error>(bytes) }).boxed(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn signed_url(&self, key: &str) -> Result<String> {
        Ok(format!("{}/objects/{}", self.base_url, key))
    }
}

// ---------- queue ----------

struct Entry {
    handle: String,
    body: String,
    leased_until: Option<Instant>,
}

/// Queue with visibility-timeout leases. Never blocks.
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
}

impl MemoryQueue {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.body.clone())
            .collect()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn send(&self, body: &str) -> Result<()> {
        self.entries.lock().unwrap().push(Entry {
            handle: Uuid::new_v4().to_string(),
            body: body.to_string(),
            leased_until: None,
        });
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        _wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let mut leased = Vec::new();

        for entry in entries.iter_mut() {
            if leased.len() == max_messages {
                break;
            }
            if entry.leased_until.is_some_and(|until| until > now) {
                continue;
            }
            entry.leased_until = Some(now + visibility_timeout);
            leased.push(QueueMessage {
                handle: entry.handle.clone(),
                body: entry.body.clone(),
            });
        }
        Ok(leased)
    }

    async fn delete_message(&self, handle: &str) -> Result<()> {
        self.entries.lock().unwrap().retain(|e| e.handle != handle);
        Ok(())
    }
}

// ---------- progress ----------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Percent { percent, .. } => Some(percent),
                ProgressEvent::Error { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------- engine stand-ins ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    /// Reports progress over a 10 second source and writes an mp4 header.
    Succeeds,
    /// Reports some progress, then exits 1.
    CrashesMidEncode,
    /// Reports 10% and then hangs until killed. Records its pid.
    Stalls,
}

struct FakeBins {
    _dir: TempDir,
    ffmpeg_ok: PathBuf,
    ffmpeg_fail: PathBuf,
    ffmpeg_stall: PathBuf,
    ffprobe: PathBuf,
}

const FFMPEG_OK: &str = r#"#!/bin/sh
for last; do :; done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "out_time=00:00:02.500000" >&2
echo "progress=continue" >&2
echo "out_time=00:00:05.000000" >&2
echo "progress=continue" >&2
echo "out_time=00:00:10.000000" >&2
echo "progress=end" >&2
printf '\000\000\000\030ftypisom' > "$last"
exit 0
"#;

const FFMPEG_FAIL: &str = r#"#!/bin/sh
for last; do :; done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "out_time=00:00:03.000000" >&2
echo "progress=continue" >&2
printf 'partial' > "$last"
echo "Error while decoding stream #0:0: Invalid data found" >&2
exit 1
"#;

const FFMPEG_STALL: &str = r#"#!/bin/sh
echo $$ > "$0.pid"
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "out_time=00:00:01.000000" >&2
echo "progress=continue" >&2
exec sleep 30
"#;

const FFPROBE: &str = r#"#!/bin/sh
echo '{"format":{"duration":"10.000000"}}'
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_bins() -> &'static FakeBins {
    static BINS: OnceLock<FakeBins> = OnceLock::new();
    BINS.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        FakeBins {
            ffmpeg_ok: write_script(dir.path(), "ffmpeg-ok", FFMPEG_OK),
            ffmpeg_fail: write_script(dir.path(), "ffmpeg-fail", FFMPEG_FAIL),
            ffmpeg_stall: write_script(dir.path(), "ffmpeg-stall", FFMPEG_STALL),
            ffprobe: write_script(dir.path(), "ffprobe", FFPROBE),
            _dir: dir,
        }
    })
}

// ---------- harness ----------

pub struct Harness {
    pub store: Arc<MemoryVideoStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryQueue>,
    pub state: AppState,
    pub scratch: TempDir,
}

pub fn test_config(scratch: &Path, mode: DispatchMode, engine: Engine) -> AppConfig {
    let bins = fake_bins();
    AppConfig {
        server_port: 0,
        database_url: String::new(),
        redis_url: String::new(),
        s3_endpoint: String::new(),
        s3_bucket: "videos".to_string(),
        s3_region: "us-east-1".to_string(),
        s3_access_key: String::new(),
        s3_secret_key: String::new(),
        dispatch_mode: mode,
        queue: QueueSettings {
            wait: Duration::ZERO,
            visibility_timeout: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(10),
            ..QueueSettings::default()
        },
        media: MediaSettings {
            ffmpeg_bin: match engine {
                Engine::Succeeds => bins.ffmpeg_ok.clone(),
                Engine::CrashesMidEncode => bins.ffmpeg_fail.clone(),
                Engine::Stalls => bins.ffmpeg_stall.clone(),
            },
            ffprobe_bin: bins.ffprobe.clone(),
            scratch_dir: scratch.to_path_buf(),
            progress_poll: Duration::from_millis(20),
            ..MediaSettings::default()
        },
    }
}

impl Harness {
    pub async fn new(mode: DispatchMode, engine: Engine) -> Self {
        Self::with_config(mode, engine, |_| {}).await
    }

    pub async fn with_config(
        mode: DispatchMode,
        engine: Engine,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let scratch = TempDir::new().unwrap();
        let mut config = test_config(scratch.path(), mode, engine);
        tweak(&mut config);

        let store = Arc::new(MemoryVideoStore::default());
        let objects = MemoryObjectStore::start().await;
        let queue = Arc::new(MemoryQueue::default());
        let state = AppState::new(config, store.clone(), objects.clone(), queue.clone());

        Self {
            store,
            objects,
            queue,
            state,
            scratch,
        }
    }

    /// An uploaded record with its original object in place.
    pub async fn seed_video(&self, format: &str) -> VideoRecord {
        let video_id = Uuid::new_v4();
        let key = original_key(video_id, format);
        self.objects.insert(&key, b"fake source bytes", "video/quicktime");

        let now = OffsetDateTime::now_utc();
        let record = VideoRecord {
            video_id,
            owner_id: None,
            title: "sample".to_string(),
            original_format: format.to_string(),
            size_bytes: 17,
            duration_seconds: Some(10.0),
            original_object_key: key,
            transcoded_object_key: None,
            transcoded_format: None,
            requested_format: None,
            thumbnail_object_key: None,
            state: VideoState::Uploaded,
            progress: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&record).await.unwrap();
        record
    }

    /// Entries left in the scratch root.
    pub fn scratch_entries(&self) -> Vec<String> {
        std::fs::read_dir(self.scratch.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Pid of the most recent `Engine::Stalls` run, once it has started.
    pub fn stalled_engine_pid() -> Option<u32> {
        let pid_file = fake_bins().ffmpeg_stall.with_extension("pid");
        std::fs::read_to_string(pid_file).ok()?.trim().parse().ok()
    }

    /// Polls the record until `done` holds or five seconds pass.
    pub async fn wait_for_record(&self, video_id: Uuid, done: impl Fn(&VideoRecord) -> bool) -> VideoRecord {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.store.snapshot(video_id).unwrap();
            if done(&record) || Instant::now() > deadline {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn never_cancelled() -> CancellationToken {
        CancellationToken::new()
    }
}

/// Whether a process with this pid still exists.
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Values carried on `data:` lines of an event-stream body.
pub fn sse_values(body: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|v| v.trim().to_string())
        .collect()
}

/// Builds a multipart/form-data body with a `video` file field and an
/// optional `title`.
pub fn multipart_body(
    file_name: &str,
    content_type: &str,
    bytes: &[u8],
    title: Option<&str>,
) -> (String, Vec<u8>) {
    let boundary = "----transcoder-test-boundary".to_string();
    let mut body = Vec::new();

    if let Some(title) = title {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n"
            )
            .as_bytes(),
        );
    }

    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}
