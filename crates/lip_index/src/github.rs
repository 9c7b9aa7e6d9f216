// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Result type alias for GitHub API operations.
pub(crate) type Result<T> = std::result::Result<T, GithubError>;

#[derive(Error, Debug)]
pub(crate) enum GithubError {
    /// HTTP request failed before producing a status code.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API signalled a rate-limit condition. `reset_at` is the epoch
    /// second at which the quota resets, when the server reported one.
    #[error("Rate limit exceeded (resets at {reset_at:?})")]
    RateLimited { reset_at: Option<u64> },

    /// The requested resource does not exist at this ref/path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-2xx response.
    #[error("API error: {status} on {url}")]
    Api { status: StatusCode, url: String },
}

/// Repository metadata carried into the index entry.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RepositoryMetadata {
    #[serde(rename = "stargazers_count")]
    pub stars: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug)]
struct SearchCodeResponse {
    items: Vec<SearchCodeItem>,
}

#[derive(Deserialize, Debug)]
struct SearchCodeItem {
    repository: SearchCodeRepository,
}

#[derive(Deserialize, Debug)]
struct SearchCodeRepository {
    full_name: String,
}

/// Client for the three GitHub collaborators the pipeline consumes: code
/// search (discovery), repository metadata, and raw content fetch.
#[derive(Debug, Clone)]
pub(crate) struct GitHubClient {
    client: Client,
    api_url: String,
    raw_url: String,
    token: String,
    /// Politeness pause between discovery pages.
    page_pause: Duration,
    /// Safety margin added on top of the reported rate-limit reset time.
    rate_limit_margin: Duration,
}

impl GitHubClient {
    pub(crate) const DEFAULT_API_URL: &'static str = "https://api.github.com";
    pub(crate) const DEFAULT_RAW_URL: &'static str = "https://raw.githubusercontent.com";

    const PER_PAGE: u32 = 100;

    pub(crate) fn new(api_url: impl Into<String>, raw_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            raw_url: raw_url.into(),
            token: token.into(),
            page_pause: Duration::from_secs(3),
            rate_limit_margin: Duration::from_secs(1),
        }
    }

    /// Overrides the discovery pacing. Tests shrink both values so mocked
    /// rate-limit roundtrips complete quickly.
    pub(crate) fn with_pacing(mut self, page_pause: Duration, rate_limit_margin: Duration) -> Self {
        self.page_pause = page_pause;
        self.rate_limit_margin = rate_limit_margin;
        self
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("lip-index"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    /// Maps a response to a typed error unless it is 2xx.
    fn classify(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GithubError::NotFound(response.url().to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            let remaining = header_u64(&response, "x-ratelimit-remaining");
            if status == StatusCode::TOO_MANY_REQUESTS || remaining == Some(0) {
                return Err(GithubError::RateLimited {
                    reset_at: header_u64(&response, "x-ratelimit-reset"),
                });
            }
        }
        Err(GithubError::Api {
            status,
            url: response.url().to_string(),
        })
    }

    /// Fetches one page of code-search results for `marker`, returning the
    /// full names of the matching repositories. Pages are 1-based.
    async fn search_code_page(&self, marker: &str, page: u32) -> Result<Vec<String>> {
        let url = format!("{}/search/code", self.api_url);
        let query = format!("{marker} filename:tooth.json path:/");
        let per_page = Self::PER_PAGE.to_string();
        let page = page.to_string();
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .query(&[
                ("q", query.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ])
            .send()
            .await?;
        let response = Self::classify(response)?;
        let body: SearchCodeResponse = response.json().await?;
        Ok(body
            .items
            .into_iter()
            .map(|item| item.repository.full_name)
            .collect())
    }

    /// Discovers every repository publishing a manifest carrying `marker`.
    /// A rate-limit condition suspends this call path until the reported
    /// reset time elapses, then retries the same page; any other failure is
    /// fatal to discovery and surfaces to the caller.
    pub(crate) async fn discover_repositories(&self, marker: &str) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut page = 1u32;
        loop {
            match self.search_code_page(marker, page).await {
                Ok(names) => {
                    if names.is_empty() {
                        break;
                    }
                    for name in names {
                        if !repositories.contains(&name) {
                            repositories.push(name);
                        }
                    }
                    info!(page, total = repositories.len(), "Fetched discovery page");
                    page += 1;
                    tokio::time::sleep(self.page_pause).await;
                }
                Err(GithubError::RateLimited { reset_at }) => {
                    let wait = self.rate_limit_wait(reset_at);
                    warn!(wait_secs = wait.as_secs(), "Search rate limit exceeded, waiting for reset");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(repositories)
    }

    fn rate_limit_wait(&self, reset_at: Option<u64>) -> Duration {
        let until_reset = reset_at
            .map(|reset| {
                let now = Utc::now().timestamp().max(0) as u64;
                Duration::from_secs(reset.saturating_sub(now))
            })
            .unwrap_or_default();
        until_reset + self.rate_limit_margin
    }

    /// Fetches star count and last-updated timestamp for `repo`.
    pub(crate) async fn get_metadata(&self, repo: &str) -> Result<RepositoryMetadata> {
        let url = format!("{}/repos/{}", self.api_url, repo);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;
        let response = Self::classify(response)?;
        Ok(response.json().await?)
    }

    /// Fetches the raw tooth.json bytes at `git_ref`. Non-2xx means the
    /// manifest is absent at that ref.
    pub(crate) async fn fetch_raw_manifest(&self, repo: &str, git_ref: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}/{}/tooth.json", self.raw_url, repo, git_ref);
        let response = self.client.get(&url).send().await?;
        let response = Self::classify(response)?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(server.uri(), server.uri(), "test-token")
            .with_pacing(Duration::ZERO, Duration::from_millis(10))
    }

    fn search_body(names: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "total_count": names.len(),
            "items": names
                .iter()
                .map(|n| serde_json::json!({"repository": {"full_name": n}}))
                .collect::<Vec<_>>(),
        })
    }

    #[tokio::test]
    async fn discovery_paginates_until_empty_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["acme/tool", "acme/lib"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["other/pkg"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&[])))
            .mount(&server)
            .await;

        let repos = test_client(&server)
            .discover_repositories("marker")
            .await
            .unwrap();
        assert_eq!(repos, vec!["acme/tool", "acme/lib", "other/pkg"]);
    }

    #[tokio::test]
    async fn discovery_waits_out_rate_limit_and_retries_same_page() {
        let server = MockServer::start().await;

        // First hit is rate limited with a reset time already in the past;
        // the retry succeeds.
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", "0"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["acme/tool"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&[])))
            .mount(&server)
            .await;

        let repos = test_client(&server)
            .discover_repositories("marker")
            .await
            .unwrap();
        assert_eq!(repos, vec!["acme/tool"]);
    }

    #[tokio::test]
    async fn discovery_surfaces_non_rate_limit_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = test_client(&server).discover_repositories("marker").await;
        assert!(matches!(result, Err(GithubError::Api { .. })));
    }

    #[tokio::test]
    async fn metadata_parses_stars_and_updated_at() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/tool"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stargazers_count": 42,
                "updated_at": "2024-01-15T10:30:00Z",
            })))
            .mount(&server)
            .await;

        let meta = test_client(&server).get_metadata("acme/tool").await.unwrap();
        assert_eq!(meta.stars, 42);
        assert_eq!(meta.updated_at.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[tokio::test]
    async fn raw_manifest_404_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme/tool/HEAD/tooth.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = test_client(&server).fetch_raw_manifest("acme/tool", "HEAD").await;
        assert!(matches!(result, Err(GithubError::NotFound(_))));
    }

    #[tokio::test]
    async fn raw_manifest_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme/tool/v1.0.0/tooth.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"tooth\": \"x\"}"))
            .mount(&server)
            .await;

        let bytes = test_client(&server)
            .fetch_raw_manifest("acme/tool", "v1.0.0")
            .await
            .unwrap();
        assert_eq!(bytes, b"{\"tooth\": \"x\"}");
    }
}
