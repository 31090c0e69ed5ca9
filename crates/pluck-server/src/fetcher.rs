//! Page fetcher: bounded-timeout HTTP GET behind the URL gate.
//!
//! Not a browser. One request, no retry; any redirect hop is gated the same
//! way as the original URL.

use std::time::Duration;

use async_trait::async_trait;
use pluck::url_gate::classify_url;
use url::Url;

use crate::error::{ServiceError, ServiceResult};

/// Most redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Largest upstream body read into memory.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Requested URL.
    pub url: Url,
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub body: String,
}

/// Anything that can turn a gated URL into HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> ServiceResult<FetchedPage>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> ServiceResult<Self> {
        let policy = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
            }
            if classify_url(attempt.url().clone()).is_allowed() {
                attempt.follow()
            } else {
                let target = attempt.url().to_string();
                attempt.error(format!("redirect to disallowed URL {target}"))
            }
        });

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(policy)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout,
            max_body: MAX_BODY_BYTES,
        })
    }

    /// Override the body cap.
    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    fn too_large(&self, url: &Url) -> ServiceError {
        tracing::warn!(%url, max_body = self.max_body, "upstream body too large");
        ServiceError::Fetch(format!(
            "response body exceeds {} bytes",
            self.max_body
        ))
    }

    fn map_error(&self, url: &Url, e: reqwest::Error) -> ServiceError {
        let timeout_ms = self.timeout.as_millis() as u64;
        if e.is_timeout() {
            tracing::warn!(%url, timeout_ms, "fetch timed out");
            ServiceError::FetchTimeout(timeout_ms)
        } else if e.is_redirect() {
            tracing::warn!(%url, error = %e, "redirect refused");
            ServiceError::Input(format!("redirect refused: {e}"))
        } else {
            tracing::warn!(%url, error = %e, "fetch failed");
            ServiceError::Fetch(e.to_string())
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> ServiceResult<FetchedPage> {
        let mut resp = self
            .client
            .get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| self.map_error(url, e))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        if !resp.status().is_success() {
            tracing::info!(%url, status, "upstream returned non-success status");
            return Err(ServiceError::UpstreamStatus(status));
        }

        if resp
            .content_length()
            .is_some_and(|len| len > self.max_body as u64)
        {
            return Err(self.too_large(url));
        }

        let mut buf = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| self.map_error(url, e))? {
            if buf.len() + chunk.len() > self.max_body {
                return Err(self.too_large(url));
            }
            buf.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&buf).into_owned();
        tracing::debug!(%url, %final_url, bytes = body.len(), "fetched page");

        Ok(FetchedPage {
            url: url.clone(),
            final_url,
            status,
            body,
        })
    }
}
