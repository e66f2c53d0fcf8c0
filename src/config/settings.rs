use crate::config::env::{self, EnvKey};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How a conversion request reaches the transcode worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Publish a job message and let a separate worker process pick it up.
    Queue,
    /// Run the worker inside the request and stream its progress directly.
    Inline,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(DispatchMode::Queue),
            "inline" => Ok(DispatchMode::Inline),
            other => Err(format!("unknown dispatch mode '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub max_messages: usize,
    pub wait: Duration,
    pub visibility_timeout: Duration,
    pub idle_sleep: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            stream: "transcode:jobs".to_string(),
            group: "transcode:workers".to_string(),
            consumer: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            max_messages: 10,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(900),
            idle_sleep: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MediaSettings {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub scratch_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub signed_url_ttl: Duration,
    pub progress_poll: Duration,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            scratch_dir: std::env::temp_dir(),
            max_upload_bytes: 200 * 1024 * 1024,
            signed_url_ttl: Duration::from_secs(3600),
            progress_poll: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub dispatch_mode: DispatchMode,
    pub queue: QueueSettings,
    pub media: MediaSettings,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        let queue_defaults = QueueSettings::default();
        let media_defaults = MediaSettings::default();

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get(EnvKey::DatabaseUrl)?,
            redis_url: env::get(EnvKey::RedisUrl)?,
            s3_endpoint: env::get(EnvKey::S3Endpoint)?,
            s3_bucket: env::get(EnvKey::S3Bucket)?,
            s3_region: env::get_or(EnvKey::S3Region, "us-east-1"),
            s3_access_key: env::get(EnvKey::S3AccessKey)?,
            s3_secret_key: env::get(EnvKey::S3SecretKey)?,
            dispatch_mode: env::get_parsed(EnvKey::DispatchMode, DispatchMode::Queue),
            queue: QueueSettings {
                stream: env::get_or(EnvKey::QueueStream, &queue_defaults.stream),
                group: env::get_or(EnvKey::QueueGroup, &queue_defaults.group),
                consumer: env::get_or(EnvKey::QueueConsumer, &queue_defaults.consumer),
                max_messages: env::get_parsed(EnvKey::QueueMaxMessages, queue_defaults.max_messages),
                wait: Duration::from_secs(env::get_parsed(EnvKey::QueueWaitSeconds, 20)),
                visibility_timeout: Duration::from_secs(env::get_parsed(
                    EnvKey::QueueVisibilityTimeout,
                    900,
                )),
                idle_sleep: Duration::from_millis(env::get_parsed(EnvKey::QueueIdleSleepMs, 1000)),
            },
            media: MediaSettings {
                ffmpeg_bin: PathBuf::from(env::get_or(EnvKey::FfmpegBin, "ffmpeg")),
                ffprobe_bin: PathBuf::from(env::get_or(EnvKey::FfprobeBin, "ffprobe")),
                scratch_dir: env::get(EnvKey::ScratchDir)
                    .map(PathBuf::from)
                    .unwrap_or(media_defaults.scratch_dir),
                max_upload_bytes: env::get_parsed(
                    EnvKey::MaxUploadBytes,
                    media_defaults.max_upload_bytes,
                ),
                signed_url_ttl: Duration::from_secs(env::get_parsed(EnvKey::SignedUrlTtl, 3600)),
                progress_poll: Duration::from_millis(env::get_parsed(EnvKey::ProgressPollMs, 1000)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_mode_parses_case_insensitively() {
        assert_eq!("Queue".parse::<DispatchMode>(), Ok(DispatchMode::Queue));
        assert_eq!(" inline ".parse::<DispatchMode>(), Ok(DispatchMode::Inline));
        assert!("sync".parse::<DispatchMode>().is_err());
    }

    #[test]
    fn queue_defaults_poll_generously() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_messages, 10);
        assert_eq!(settings.wait, Duration::from_secs(20));
        assert!(settings.visibility_timeout > settings.wait);
        assert!(settings.consumer.starts_with("worker-"));
    }
}
