use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RedisUrl,
    S3Endpoint,
    S3Bucket,
    S3Region,
    S3AccessKey,
    S3SecretKey,
    DispatchMode,
    QueueStream,
    QueueGroup,
    QueueConsumer,
    QueueMaxMessages,
    QueueWaitSeconds,
    QueueVisibilityTimeout,
    QueueIdleSleepMs,
    FfmpegBin,
    FfprobeBin,
    ScratchDir,
    MaxUploadBytes,
    SignedUrlTtl,
    ProgressPollMs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3Bucket => "S3_BUCKET",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::DispatchMode => "DISPATCH_MODE",
            EnvKey::QueueStream => "QUEUE_STREAM",
            EnvKey::QueueGroup => "QUEUE_GROUP",
            EnvKey::QueueConsumer => "QUEUE_CONSUMER",
            EnvKey::QueueMaxMessages => "QUEUE_MAX_MESSAGES",
            EnvKey::QueueWaitSeconds => "QUEUE_WAIT_SECONDS",
            EnvKey::QueueVisibilityTimeout => "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
            EnvKey::QueueIdleSleepMs => "QUEUE_IDLE_SLEEP_MS",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::FfprobeBin => "FFPROBE_BIN",
            EnvKey::ScratchDir => "SCRATCH_DIR",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
            EnvKey::SignedUrlTtl => "SIGNED_URL_TTL_SECONDS",
            EnvKey::ProgressPollMs => "PROGRESS_POLL_MS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
