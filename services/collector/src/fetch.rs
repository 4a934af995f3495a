//! Raw Fetcher - HTTP downloads with an empty-body retry loop.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("empty response body from {url} after {attempts} attempts")]
    EmptyBody { url: String, attempts: u32 },
}

/// Anything that can hand out raw source bytes.
///
/// The HTTP implementation is [`Fetcher`]; tests substitute canned responses.
#[allow(async_fn_in_trait)]
pub trait SourceReader {
    async fn bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Body as UTF-8 text, for HTML and JSON discovery pages.
    async fn text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// HTTP client shared by every download of a run.
///
/// Cookies are kept so that session handshakes carry over to the downloads
/// that follow them.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            retries: config.fetch_retries,
            retry_delay: config.fetch_retry_delay,
        })
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let http = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http)?;
        let bytes = resp.bytes().await.map_err(http)?;
        debug!(url, size = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }
}

impl SourceReader for Fetcher {
    async fn bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        retry_on_empty(url, self.retries, self.retry_delay, || self.get_once(url)).await
    }
}

/// Run `attempt` until it yields a non-empty body.
///
/// Sources occasionally answer 200 with zero bytes while a file is being
/// regenerated. Errors from `attempt` are returned immediately.
pub async fn retry_on_empty<F, Fut>(
    url: &str,
    retries: u32,
    delay: Duration,
    mut attempt: F,
) -> Result<Vec<u8>, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>, FetchError>>,
{
    for n in 0..=retries {
        let body = attempt().await?;
        if !body.is_empty() {
            return Ok(body);
        }
        if n < retries {
            warn!(url, attempt = n + 1, "empty response body, retrying");
            sleep(delay).await;
        }
    }
    Err(FetchError::EmptyBody {
        url: url.to_string(),
        attempts: retries + 1,
    })
}
