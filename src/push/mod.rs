//! Push-notification plumbing: frame codec, transport seam and the refresh
//! scheduler.

pub mod scheduler;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};

/// Tag prefix of discussion update frames.
pub const PULL_REQUEST_TAG: &str = "pull_request:";

/// One decoded `[tag, payload]` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    pub tag: String,
    pub payload: Value,
}

/// A discussion-update notification extracted from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotice {
    pub discussion_id: String,
    /// Server-requested delay before re-fetching.
    pub wait: Duration,
}

impl PushFrame {
    pub fn is_discussion_update(&self) -> bool {
        self.tag.starts_with(PULL_REQUEST_TAG)
    }

    pub fn update_notice(&self) -> Option<UpdateNotice> {
        let discussion_id = self.tag.strip_prefix(PULL_REQUEST_TAG)?;
        let wait = self
            .payload
            .get("wait")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Some(UpdateNotice {
            discussion_id: discussion_id.to_string(),
            wait: Duration::from_millis(wait),
        })
    }
}

/// Decode a wire frame: a JSON array of exactly `[tag, payload]`.
pub fn parse_frame(text: &str) -> Result<PushFrame> {
    let (tag, payload): (String, Value) = serde_json::from_str(text)
        .map_err(|e| AppError::Parse(format!("Malformed push frame: {e}")))?;
    Ok(PushFrame { tag, payload })
}

pub fn subscribe_command(discussion_id: &str) -> String {
    format!("subscribe:{PULL_REQUEST_TAG}{discussion_id}")
}

/// First `href="wss:…"` attribute in a page's markup.
pub fn find_socket_url(html: &str) -> Option<String> {
    let re = Regex::new(r#"href="(wss:.+?)""#).ok()?;
    re.captures(html).map(|c| c[1].to_string())
}

/// Fetch a page and pull the push endpoint out of it. `None` when the page
/// advertises no endpoint.
pub async fn discover_socket_url(http: &reqwest::Client, page_url: &str) -> Result<Option<String>> {
    let response = http.get(page_url).send().await?;
    let html = response.text().await?;
    let url = find_socket_url(&html);

    match &url {
        Some(url) => tracing::debug!(page = page_url, socket = %url, "Discovered push endpoint"),
        None => tracing::info!(page = page_url, "Page advertises no push endpoint"),
    }
    Ok(url)
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>>;
}

#[async_trait]
pub trait PushConnection: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Next text frame, or `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}
