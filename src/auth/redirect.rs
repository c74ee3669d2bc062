use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::LOCATION, StatusCode},
    response::IntoResponse,
};

use crate::config::OAuthConfig;
use crate::server::AppState;

use super::generate_state_token;

pub fn build_redirect(config: &OAuthConfig, state: &str) -> String {
    let mut url = format!(
        "{}{}?response_type=code&client_id={}",
        config.git_hostname.trim_end_matches('/'),
        config.authorize_path,
        urlencoding::encode(&config.client_id),
    );
    if !config.redirect_url.is_empty() {
        url.push_str("&redirect_uri=");
        url.push_str(&urlencoding::encode(&config.redirect_url));
    }
    url.push_str("&scope=");
    url.push_str(&urlencoding::encode(&config.scopes));
    url.push_str("&state=");
    url.push_str(&urlencoding::encode(state));
    url
}

/// `GET /auth`: send the popup on to the provider's authorize page.
pub async fn handle_authorize(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let url = build_redirect(&state.oauth, &generate_state_token());
    tracing::debug!(host = %state.oauth.git_hostname, "Redirecting to authorize page");
    (StatusCode::FOUND, [(LOCATION, url)])
}
