//! Status endpoint client.

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::errors::{FetchError, TrackerError};

/// Fetches the JSON body of a status endpoint.
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// `GET url` and decode the body as JSON.
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

/// [`StatusClient`] over `reqwest`.
///
/// Relative URLs are resolved against the API base URL. Requests carry the
/// bearer token when one is configured.
#[derive(Clone, Debug)]
pub struct ReqwestStatusClient {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ReqwestStatusClient {
    /// Build a client for `api_base_url`.
    pub fn new(api_base_url: &str, token: Option<String>) -> Result<Self, TrackerError> {
        Self::with_client(reqwest::Client::new(), api_base_url, token)
    }

    /// Build on an existing `reqwest::Client`.
    pub fn with_client(
        client: reqwest::Client,
        api_base_url: &str,
        token: Option<String>,
    ) -> Result<Self, TrackerError> {
        let mut base = Url::parse(api_base_url).map_err(|e| TrackerError::InvalidUrl {
            url: api_base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TrackerError::InvalidUrl {
                url: api_base_url.to_string(),
                reason: format!("unsupported scheme {}", base.scheme()),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Resolve a tracking URL: absolute URLs pass through, relative ones join
    /// the base.
    pub fn resolve(&self, url: &str) -> Result<Url, FetchError> {
        let resolved = if url.starts_with("http://") || url.starts_with("https://") {
            Url::parse(url)
        } else {
            self.base.join(url)
        };
        resolved.map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StatusClient for ReqwestStatusClient {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let resolved = self.resolve(url)?;
        trace!(url = %resolved, "fetching status");

        let mut request = self.client.get(resolved.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| FetchError::Transport {
            url: resolved.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                url: resolved.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(|e| FetchError::Transport {
            url: resolved.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| FetchError::Decode {
            url: resolved.to_string(),
            reason: e.to_string(),
        })
    }
}
