//! One-shot HTTP GET.

use bytes::Bytes;
use std::time::Duration;
use url::Url;
use vt_core::NetworkError;

/// Fetches the body at a URL. One attempt, no retry.
///
/// Implementations report transport failures and non-success statuses as
/// [`NetworkError`]; interpreting the body is the caller's job.
#[async_trait::async_trait]
pub trait HttpFetch: std::fmt::Debug + Send + Sync + 'static {
    async fn get(&self, url: &Url) -> Result<Bytes, NetworkError>;
}

/// [`HttpFetch`] over a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    http_client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vt/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait::async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get(&self, url: &Url) -> Result<Bytes, NetworkError> {
        tracing::debug!(%url, "GET");
        let res = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NetworkError::transport(url.as_str(), e))?;

        if !res.status().is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            });
        }

        res.bytes()
            .await
            .map_err(|e| NetworkError::transport(url.as_str(), e))
    }
}
