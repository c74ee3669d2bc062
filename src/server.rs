use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::OAuthConfig;

pub struct AppState {
    pub oauth: OAuthConfig,
}

impl AppState {
    pub fn new(oauth: OAuthConfig) -> Self {
        Self { oauth }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth", get(crate::auth::redirect::handle_authorize))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
