//! Transport seam for the remote snapshot.
//!
//! The snapshot is a static file, so the only operations are a header-only
//! request, a ranged read of its prefix, and a streamed full read.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, CACHE_CONTROL, CONTENT_LENGTH, ETAG, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::HTTP_CONNECT_TIMEOUT_SECS;
use crate::error::{AppError, Result};

/// Cache validators reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadInfo {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl HeadInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            etag: text(ETAG),
            last_modified: text(LAST_MODIFIED),
            content_length: text(CONTENT_LENGTH).and_then(|s| s.parse().ok()),
        }
    }
}

/// Outcome of a ranged read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeFetch {
    /// `206 Partial Content` with the requested prefix.
    Partial(Vec<u8>),
    /// The server ignored or rejected the range.
    Unsupported,
}

/// A full snapshot response whose body has not been read yet.
pub struct SnapshotBody {
    pub head: HeadInfo,
    pub chunks: BoxStream<'static, Result<Vec<u8>>>,
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Location of the snapshot, for log and error messages.
    fn url(&self) -> &str;
    /// Header-only request.
    async fn head(&self) -> Result<HeadInfo>;
    /// Read the first `len` bytes.
    async fn fetch_prefix(&self, len: u64) -> Result<RangeFetch>;
    /// Start a full download. Fails on a non-success status.
    async fn open(&self) -> Result<SnapshotBody>;
}

/// HTTP implementation of [`SnapshotSource`].
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, url: url.into() })
    }
}

/// Connection failures and timeouts mean the server could not be reached at
/// all; everything else stays a plain HTTP error.
fn send_error(url: &str, e: reqwest::Error) -> AppError {
    if e.is_connect() || e.is_timeout() {
        AppError::Unreachable(format!("{url}: {e}"))
    } else {
        AppError::Http(e)
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn head(&self) -> Result<HeadInfo> {
        let resp = self
            .client
            .head(&self.url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| send_error(&self.url, e))?;

        if !resp.status().is_success() {
            debug!(status = resp.status().as_u16(), "HEAD {} not usable", self.url);
            return Ok(HeadInfo::default());
        }
        Ok(HeadInfo::from_headers(resp.headers()))
    }

    async fn fetch_prefix(&self, len: u64) -> Result<RangeFetch> {
        let last = len.saturating_sub(1);
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes=0-{last}"))
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| send_error(&self.url, e))?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            debug!(status = resp.status().as_u16(), "Range request on {} not honoured", self.url);
            return Ok(RangeFetch::Unsupported);
        }
        Ok(RangeFetch::Partial(resp.bytes().await?.to_vec()))
    }

    async fn open(&self) -> Result<SnapshotBody> {
        let resp = self
            .client
            .get(&self.url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| send_error(&self.url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Status { url: self.url.clone(), status: status.as_u16() });
        }
        if status == StatusCode::NO_CONTENT {
            return Err(AppError::MissingBody(self.url.clone()));
        }

        let mut head = HeadInfo::from_headers(resp.headers());
        head.content_length = head.content_length.or(resp.content_length());
        let chunks = resp
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(AppError::from)
            .boxed();

        Ok(SnapshotBody { head, chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn head_info_reads_validators() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"66f1-abc\""));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Tue, 01 Oct 2024 00:00:00 GMT"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2048"));

        let info = HeadInfo::from_headers(&headers);
        assert_eq!(info.etag.as_deref(), Some("\"66f1-abc\""));
        assert_eq!(info.last_modified.as_deref(), Some("Tue, 01 Oct 2024 00:00:00 GMT"));
        assert_eq!(info.content_length, Some(2048));
    }

    #[test]
    fn blank_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("  "));
        assert_eq!(HeadInfo::from_headers(&headers), HeadInfo::default());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/complete-dataset.json", listener.local_addr().unwrap());
        drop(listener);
        let source = HttpSource::new(url).unwrap();

        let err = source.head().await.unwrap_err();

        assert!(matches!(err, AppError::Unreachable(_)), "got {err:?}");
        assert!(err.is_remote());
    }
}
