use dotenvy::dotenv;
use std::sync::Arc;
use tracing::info;
use video_transcoder::app;
use video_transcoder::config::logging::init_tracing;
use video_transcoder::config::settings::AppConfig;
use video_transcoder::infrastructure::db::pool::{connect_to_db, run_migrations};
use video_transcoder::infrastructure::queue::redis_stream::RedisStreamQueue;
use video_transcoder::infrastructure::storage::s3::StorageService;
use video_transcoder::modules::video::repository::PgVideoStore;
use video_transcoder::state::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();

    init_tracing();

    info!("Starting server...");

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

    let port = config.server_port;
    info!("Dispatch mode: {:?}", config.dispatch_mode);

    let state = AppState::new(
        config,
        Arc::new(PgVideoStore::new(db)),
        Arc::new(storage),
        Arc::new(queue),
    );

    let app = app::create_app(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .expect("Server error");
}
