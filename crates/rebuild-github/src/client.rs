//! GitHub REST client
//!
//! Thin wrapper over `reqwest` that applies authentication, the API version
//! header and turns non-2xx responses into [`GitHubError::Status`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::GitHubError;
use crate::Result;

/// Public GitHub REST root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";
/// Per-request budget covering connect, send and body read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2022-11-28";

/// GitHub connection settings
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// REST API root (GitHub Enterprise uses `https://host/api/v3`)
    pub api_url: String,
    /// Token with `actions:write` on every target repository
    pub token: Option<String>,
    pub user_agent: String,
    /// A request still unanswered after this long fails as a transport error
    pub timeout: Duration,
}

impl GitHubConfig {
    /// Create config for a specific API root
    pub fn new(api_url: &str) -> Self {
        GitHubConfig {
            api_url: api_url.to_string(),
            token: None,
            user_agent: format!("rebuild/{}", env!("CARGO_PKG_VERSION")),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Authenticated GitHub REST client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_url: String,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| GitHubError::Config(format!("token is not a valid header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(GitHubClient {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Absolute URL for an API path such as `/repos/o/r/branches`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.http.get(&url).query(query).send().await?;
        let body = check_status(&url, response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self.http.post(&url).json(body).send().await?;
        check_status(&url, response).await?;
        Ok(())
    }
}

async fn check_status(url: &str, response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GitHubError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Ok(body)
}
