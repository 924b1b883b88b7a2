//! HTTP adapter for the external resource provider.
//!
//! Deletes a resource with `DELETE {base_url}/assistant/{external_id}` and a
//! bearer credential. A 404 means the provider no longer has the resource,
//! which counts as a successful deletion.

use crate::application::ports::{ProviderDeletion, ProviderError, ResourceProvider};
use crate::domain::resource::ExternalId;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::fmt;
use std::time::Duration;

/// Environment variable holding the provider base URL.
pub const BASE_URL_ENV: &str = "QUOTA_PROVIDER_BASE_URL";
/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "QUOTA_PROVIDER_API_KEY";
/// Environment variable holding the request timeout in seconds.
pub const TIMEOUT_ENV: &str = "QUOTA_PROVIDER_TIMEOUT_SECS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Error building the provider configuration or client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid provider base url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid provider timeout {value:?}, expected a positive number of seconds")]
    InvalidTimeout { value: String },
    #[error("could not build HTTP client: {0}")]
    Client(String),
}

/// Connection settings for [`HttpResourceProvider`].
#[derive(Clone)]
pub struct HttpProviderConfig {
    pub base_url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl fmt::Debug for HttpProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProviderConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpProviderConfig {
    /// Settings with the default request timeout.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::Missing(API_KEY_ENV));
        }
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            api_key,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read settings from `QUOTA_PROVIDER_BASE_URL`, `QUOTA_PROVIDER_API_KEY`
    /// and the optional `QUOTA_PROVIDER_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup(BASE_URL_ENV).ok_or(ConfigError::Missing(BASE_URL_ENV))?;
        let api_key = lookup(API_KEY_ENV).ok_or(ConfigError::Missing(API_KEY_ENV))?;
        let config = Self::new(&base_url, api_key)?;

        match lookup(TIMEOUT_ENV) {
            None => Ok(config),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(config.with_timeout(Duration::from_secs(secs))),
                _ => Err(ConfigError::InvalidTimeout { value }),
            },
        }
    }
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base url".to_string()));
    }
    Ok(url)
}

/// [`ResourceProvider`] speaking the provider's REST API.
#[derive(Debug, Clone)]
pub struct HttpResourceProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpResourceProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ConfigError::Client(err.to_string()))?;
        Ok(Self { client, config })
    }

    /// Build from the environment, see [`HttpProviderConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(HttpProviderConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpProviderConfig {
        &self.config
    }

    fn url_for(&self, external_id: &ExternalId) -> Result<Url, ProviderError> {
        let mut url = self.config.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ProviderError::Unavailable("provider base url cannot be a base".into()))?;
            segments
                .pop_if_empty()
                .push("assistant")
                .push(external_id.as_str());
        }
        Ok(url)
    }
}

#[async_trait]
impl ResourceProvider for HttpResourceProvider {
    async fn delete_resource(
        &self,
        external_id: &ExternalId,
    ) -> Result<ProviderDeletion, ProviderError> {
        let url = self.url_for(external_id)?;
        tracing::debug!(%url, "Deleting resource at provider");

        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout(self.config.timeout)
                } else {
                    ProviderError::Unavailable(err.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(ProviderDeletion::NotFound);
        }
        if status.is_success() {
            return Ok(ProviderDeletion::Deleted);
        }

        let body = match tokio::time::timeout(BODY_TIMEOUT, response.text()).await {
            Ok(Ok(text)) => text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            Ok(Err(err)) => format!("<error while receiving response body: {err}>"),
            Err(_) => "<timed out while receiving response body>".to_string(),
        };
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup() {
        let config = HttpProviderConfig::from_lookup(lookup(&[
            (BASE_URL_ENV, "https://api.example.com/v1"),
            (API_KEY_ENV, "secret"),
            (TIMEOUT_ENV, "3"),
        ]))
        .unwrap();

        assert_eq!(config.base_url.as_str(), "https://api.example.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn test_from_lookup_errors() {
        assert_eq!(
            HttpProviderConfig::from_lookup(lookup(&[(API_KEY_ENV, "k")])).unwrap_err(),
            ConfigError::Missing(BASE_URL_ENV)
        );
        assert!(matches!(
            HttpProviderConfig::from_lookup(lookup(&[
                (BASE_URL_ENV, "ftp://example.com"),
                (API_KEY_ENV, "k"),
            ])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpProviderConfig::from_lookup(lookup(&[
                (BASE_URL_ENV, "https://example.com"),
                (API_KEY_ENV, "k"),
                (TIMEOUT_ENV, "0"),
            ])),
            Err(ConfigError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_url_for() {
        let provider = HttpResourceProvider::new(
            HttpProviderConfig::new("https://api.example.com/v1/", "k").unwrap(),
        )
        .unwrap();

        let url = provider.url_for(&ExternalId::new("asst 42")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/assistant/asst%2042");
    }

    /// Serve one canned HTTP response and return the raw request head.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (Url::parse(&format!("http://{addr}/v1")).unwrap(), handle)
    }

    #[tokio::test]
    async fn test_delete_sends_bearer_request() {
        let (base, server) = serve_once("200 OK", "").await;
        let provider =
            HttpResourceProvider::new(HttpProviderConfig::new(base.as_str(), "key-1").unwrap())
                .unwrap();

        let result = provider.delete_resource(&ExternalId::new("abc")).await;
        let request = server.await.unwrap().to_lowercase();

        assert_eq!(result, Ok(ProviderDeletion::Deleted));
        assert!(request.starts_with("delete /v1/assistant/abc http/1.1"));
        assert!(request.contains("authorization: bearer key-1"));
    }

    #[tokio::test]
    async fn test_not_found_is_success() {
        let (base, server) = serve_once("404 Not Found", "").await;
        let provider =
            HttpResourceProvider::new(HttpProviderConfig::new(base.as_str(), "k").unwrap())
                .unwrap();

        let result = provider.delete_resource(&ExternalId::new("gone")).await;
        server.await.unwrap();
        assert_eq!(result, Ok(ProviderDeletion::NotFound));
    }

    #[tokio::test]
    async fn test_server_error_is_rejected_with_body() {
        let (base, server) = serve_once("503 Service Unavailable", "try later").await;
        let provider =
            HttpResourceProvider::new(HttpProviderConfig::new(base.as_str(), "k").unwrap())
                .unwrap();

        let result = provider.delete_resource(&ExternalId::new("x")).await;
        server.await.unwrap();
        assert_eq!(
            result,
            Err(ProviderError::Rejected {
                status: 503,
                body: "try later".into()
            })
        );
    }
}
