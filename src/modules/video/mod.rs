use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

pub mod dto;
pub mod events;
pub mod formats;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

/// Room for the multipart envelope around the file itself.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

pub fn router(state: &AppState) -> Router<AppState> {
    let upload_limit = (state.config.media.max_upload_bytes + MULTIPART_OVERHEAD) as usize;

    let upload = Router::new()
        .route("/videos/upload", post(handler::upload_video))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit));

    Router::new()
        .route("/videos", get(handler::list_videos))
        .route("/videos/{id}", get(handler::get_video))
        .route("/videos/convert", post(handler::convert_video))
        .route("/videos/reformat/{id}", post(handler::reformat_video))
        .route("/videos/download/{id}", get(handler::download_video))
        .route("/videos/delete/{id}", delete(handler::delete_video))
        .merge(upload)
}
