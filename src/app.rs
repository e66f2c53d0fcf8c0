use crate::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn create_app(state: AppState) -> Router {
    crate::routes::configure_routes(&state)
        .layer(axum::middleware::from_fn(
            crate::middleware::identity::identity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
