use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::push::scheduler::RefreshPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_web_host")]
    pub web_host: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_review_page_size")]
    pub review_page_size: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            web_host: default_web_host(),
            max_pages: default_max_pages(),
            review_page_size: default_review_page_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    /// URL of the auth backend. Its origin is the only origin trusted during
    /// the sign-in handshake.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_popup_width")]
    pub popup_width: u32,
    #[serde(default = "default_popup_height")]
    pub popup_height: u32,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_popup_poll_millis")]
    pub popup_poll_millis: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: default_authorize_url(),
            endpoint: String::new(),
            client_id: String::new(),
            scope: default_scope(),
            provider: default_provider(),
            popup_width: default_popup_width(),
            popup_height: default_popup_height(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            popup_poll_millis: default_popup_poll_millis(),
        }
    }
}

impl AuthConfig {
    /// Origin of the auth endpoint: everything before its last `/`.
    pub fn trusted_origin(&self) -> &str {
        match self.endpoint.rfind('/') {
            Some(idx) => &self.endpoint[..idx],
            None => &self.endpoint,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn popup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.popup_poll_millis)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PushConfig {
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    /// Explicit websocket URL. Discovered from the page markup when absent.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Settings for the authorize-redirect endpoint. Built once at startup and
/// shared by reference with every request handler.
///
/// The client secret belongs to the code-for-token exchange, which runs
/// elsewhere; a `client_secret` key in the file is ignored.
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_git_hostname")]
    pub git_hostname: String,
    #[serde(default = "default_authorize_path")]
    pub authorize_path: String,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default = "default_scope")]
    pub scopes: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            git_hostname: default_git_hostname(),
            authorize_path: default_authorize_path(),
            redirect_url: String::new(),
            scopes: default_scope(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com/".to_string()
}

fn default_web_host() -> String {
    "github.com".to_string()
}

fn default_max_pages() -> usize {
    30
}

fn default_review_page_size() -> u32 {
    100
}

fn default_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}

fn default_scope() -> String {
    "public_repo".to_string()
}

fn default_provider() -> String {
    "github".to_string()
}

fn default_popup_width() -> u32 {
    960
}

fn default_popup_height() -> u32 {
    600
}

fn default_handshake_timeout_secs() -> u64 {
    300
}

fn default_popup_poll_millis() -> u64 {
    500
}

fn default_store_path() -> PathBuf {
    PathBuf::from("threadline-token.toml")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_git_hostname() -> String {
    "https://github.com".to_string()
}

fn default_authorize_path() -> String {
    "/login/oauth/authorize".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("threadline").required(false));
        }

        // Environment variable overrides with THREADLINE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("THREADLINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_sources() {
        let config: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.github.api_base, "https://api.github.com/");
        assert_eq!(config.github.max_pages, 30);
        assert_eq!(config.auth.popup_width, 960);
        assert_eq!(config.auth.popup_height, 600);
        assert_eq!(config.push.refresh_policy, RefreshPolicy::Accumulate);
    }

    #[test]
    fn test_trusted_origin_strips_last_segment() {
        let auth = AuthConfig {
            endpoint: "https://auth.example.com/auth".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(auth.trusted_origin(), "https://auth.example.com");
    }

    #[test]
    fn test_refresh_policy_from_toml() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[push]\nrefresh_policy = \"replace-pending\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.push.refresh_policy, RefreshPolicy::ReplacePending);
    }

    #[test]
    fn test_oauth_secret_is_never_loaded() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[oauth]\nclient_id = \"cid\"\nclient_secret = \"hunter2\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.oauth.client_id, "cid");
        assert!(!format!("{:?}", config.oauth).contains("hunter2"));
    }
}
