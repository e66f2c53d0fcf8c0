use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use video_transcoder::config::logging::init_tracing;
use video_transcoder::config::settings::AppConfig;
use video_transcoder::infrastructure::db::pool::{connect_to_db, run_migrations};
use video_transcoder::infrastructure::queue::redis_stream::RedisStreamQueue;
use video_transcoder::infrastructure::storage::s3::StorageService;
use video_transcoder::modules::video::repository::PgVideoStore;
use video_transcoder::workers::consumer::QueueConsumer;
use video_transcoder::workers::transcoder::TranscodeContext;

#[tokio::main]
async fn main() {
    dotenv().ok();

    init_tracing();

    info!("🎥 Starting transcode worker...");

    let config = AppConfig::new().expect("Failed to load configuration");

    let db = connect_to_db(&config.database_url)
        .await
        .expect("Failed to connect to database");
    run_migrations(&db).await.expect("Failed to run migrations");

    let storage = StorageService::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_bucket,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.media.signed_url_ttl,
    )
    .await;

    let queue = RedisStreamQueue::connect(&config.redis_url, &config.queue)
        .await
        .expect("Failed to connect to queue");

    let ctx = TranscodeContext::new(
        Arc::new(PgVideoStore::new(db)),
        Arc::new(storage),
        &config.media,
    );

    match ctx.scratch.sweep_orphans(config.queue.visibility_timeout) {
        Ok(0) => {}
        Ok(n) => info!("Removed {} orphaned scratch directories", n),
        Err(e) => warn!("Scratch sweep failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("Shutdown requested, finishing current work");
            shutdown.cancel();
        }
    });

    let consumer = QueueConsumer::new(Arc::new(queue), Arc::new(ctx), config.queue.clone());
    consumer.run(shutdown).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
