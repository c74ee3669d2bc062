use std::sync::Arc;

use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::store::{TokenStore, TOKEN_KEY};

use super::pagination::parse_link_header;

const USER_AGENT: &str = concat!("threadline/", env!("CARGO_PKG_VERSION"));

/// Authenticated REST access with `Link`-header pagination.
pub struct ApiClient {
    http: Client,
    api_base: String,
    store: Arc<dyn TokenStore>,
    max_pages: usize,
}

impl ApiClient {
    pub fn new(api_base: &str, store: Arc<dyn TokenStore>, max_pages: usize) -> Result<Self> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        let api_base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{api_base}/")
        };

        Ok(Self {
            http,
            api_base,
            store,
            max_pages,
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    async fn token(&self) -> Result<String> {
        self.store
            .get(TOKEN_KEY)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Authorization("No credential in token store".to_string()))
    }

    /// Absolute URLs (pagination links) are used verbatim; relative resource
    /// paths get the API base and a cache-busting timestamp.
    fn resolve(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            return path.to_string();
        }
        let separator = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}timestamp={}",
            self.api_base,
            path.trim_start_matches('/'),
            separator,
            chrono::Utc::now().timestamp_millis()
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        let token = self.token().await?;
        let url = self.resolve(path);
        tracing::debug!(url = %url, "GET");

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        check_status(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        Ok(response.json::<T>().await?)
    }

    /// Fetch every page of a list resource and concatenate the items.
    ///
    /// Pages are fetched strictly in sequence since each `next` URL comes from
    /// the previous response. Stops after `max_pages` fetches and returns what
    /// was collected.
    pub async fn fetch_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut url = path.to_string();
        let mut pages = 0usize;

        loop {
            let response = self.get(&url).await?;
            pages += 1;

            let next = next_link(response.headers());
            let page: Vec<T> = response.json().await?;
            tracing::debug!(page = pages, items = page.len(), "Fetched page");
            items.extend(page);

            match next {
                Some(next) if pages >= self.max_pages => {
                    tracing::warn!(
                        pages,
                        next = %next,
                        "Page cap reached, returning partial results"
                    );
                    break;
                }
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(items)
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let token = self.token().await?;
        let url = self.endpoint(path);
        tracing::debug!(url = %url, "POST");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        check_status(response)
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        let token = self.token().await?;
        let url = self.endpoint(path);
        tracing::debug!(url = %url, "DELETE");

        let response = self.http.delete(&url).bearer_auth(token).send().await?;
        check_status(response)
    }
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| parse_link_header(h).remove("next"))
        .filter(|next| !next.is_empty())
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(AppError::Authorization(status_text(status)));
    }
    if !status.is_success() {
        return Err(AppError::Network(status_text(status)));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: Option<&str>) -> ApiClient {
        let store: Arc<dyn TokenStore> = match token {
            Some(t) => Arc::new(MemoryTokenStore::with_token(t)),
            None => Arc::new(MemoryTokenStore::new()),
        };
        ApiClient::new(&server.uri(), store, 30).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_authorization_error() {
        let server = MockServer::start().await;
        let api = client(&server, None);

        let err = api.get("user").await.unwrap_err();
        assert!(err.is_authorization());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_carries_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server, Some("bad")).get("user").await.unwrap_err();
        match err {
            AppError::Authorization(text) => assert_eq!(text, "Unauthorized"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server, Some("t")).get("user").await.unwrap_err();
        match err {
            AppError::Network(text) => assert_eq!(text, "Not Found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls/1/comments"))
            .and(query_param("per_page", "100"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, Some("secret"));
        let items: Vec<serde_json::Value> =
            api.fetch_all("repos/o/r/pulls/1/comments?per_page=100").await.unwrap();
        assert!(items.is_empty());

        let requests = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap_or_default().to_string();
        assert!(query.contains("timestamp="));
    }

    #[tokio::test]
    async fn test_fetch_all_follows_next_links() {
        let server = MockServer::start().await;
        let page2 = format!("{}/page2", server.uri());

        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{page2}>; rel=\"next\"").as_str())
                    .set_body_json(serde_json::json!([1, 2])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([3])))
            .mount(&server)
            .await;

        let items: Vec<u32> = client(&server, Some("t")).fetch_all("items").await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_all_stops_at_page_cap() {
        let server = MockServer::start().await;
        let looping = format!("<{}/loop>; rel=\"next\"", server.uri());

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", looping.as_str())
                    .set_body_json(serde_json::json!([0])),
            )
            .expect(30)
            .mount(&server)
            .await;

        let items: Vec<u32> = client(&server, Some("t")).fetch_all("loop").await.unwrap();
        assert_eq!(items.len(), 30);
        assert_eq!(server.received_requests().await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_fetch_all_propagates_mid_stream_error() {
        let server = MockServer::start().await;
        let page2 = format!("{}/broken", server.uri());

        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{page2}>; rel=\"next\"").as_str())
                    .set_body_json(serde_json::json!([1])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server, Some("t"))
            .fetch_all::<u32>("items")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Network(_)));
    }
}
