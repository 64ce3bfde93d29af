//! HTTP client for the StudySync document service.

use super::wire::DocumentEnvelope;
use super::RemoteClient;
use crate::error::{Error, RemoteError, Result};
use crate::{Snapshot, UserId};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::env;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Connection settings for [`HttpRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRemoteConfig {
    /// Base URL of the document service
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpRemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load settings from `STUDYSYNC_REMOTE_URL`, `STUDYSYNC_REMOTE_TOKEN`
    /// and `STUDYSYNC_REMOTE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("STUDYSYNC_REMOTE_URL")
            .map_err(|_| Error::Config("STUDYSYNC_REMOTE_URL is required".into()))?;

        let token = env::var("STUDYSYNC_REMOTE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let timeout = match env::var("STUDYSYNC_REMOTE_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| {
                    Error::Config(format!("invalid STUDYSYNC_REMOTE_TIMEOUT_SECS: {raw}"))
                })?,
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            base_url,
            token,
            timeout,
        })
    }
}

/// [`RemoteClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid remote URL '{}': {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "remote URL '{}' cannot be used as a base",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: config.token,
        })
    }

    /// `{base}/users/{user_id}/document`, with the user id percent-encoded.
    fn document_url(&self, user_id: &str) -> std::result::Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport("remote URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["users", user_id, "document"]);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    async fn fetch_snapshot(
        &self,
        user_id: &UserId,
    ) -> std::result::Result<Option<Snapshot>, RemoteError> {
        let url = self.document_url(user_id)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;

        let envelope: DocumentEnvelope = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(Some(envelope.data))
    }

    async fn upsert(
        &self,
        user_id: &UserId,
        partial: Snapshot,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.document_url(user_id)?;
        let response = self
            .authorize(self.client.patch(url))
            .json(&partial)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_encodes_user_id() {
        let remote = HttpRemote::new(HttpRemoteConfig::new("http://localhost:3000/api/")).unwrap();
        let url = remote.document_url("user/42 x").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/api/users/user%2F42%20x/document"
        );
    }

    #[test]
    fn document_url_without_trailing_slash() {
        let remote = HttpRemote::new(HttpRemoteConfig::new("http://localhost:3000")).unwrap();
        assert_eq!(
            remote.document_url("u1").unwrap().as_str(),
            "http://localhost:3000/users/u1/document"
        );
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(
            HttpRemote::new(HttpRemoteConfig::new("not a url")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            HttpRemote::new(HttpRemoteConfig::new("mailto:someone@example.com")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn config_builder() {
        let config = HttpRemoteConfig::new("http://example.com").with_token("secret");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }
}
