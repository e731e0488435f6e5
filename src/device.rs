use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use regex::Regex;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use std::sync::LazyLock;
use std::time::Duration;

use crate::messages::Feature;

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)boundary="?([^";]+)"?"#).expect("boundary regex is valid")
});

/// Control channel of the camera device
///
/// Every request is a plain GET whose response body is short text.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn get_text(&self, path_and_query: &str) -> Result<String>;
}

/// An opened MJPEG response
pub struct StreamBody {
    pub boundary: Option<String>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

/// Source of the live stream
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self, path_and_query: &str) -> Result<StreamBody>;
}

/// Parse a textual boolean as echoed by the device.
///
/// Status endpoints answer `true`/`false`, the flashlight command echoes
/// `on`/`off`; both vocabularies are accepted everywhere, in any case.
pub fn parse_flag(body: &str) -> Result<bool> {
    let value = body.trim();
    let is = |word: &str| value.eq_ignore_ascii_case(word);

    if is("true") || is("on") {
        Ok(true)
    } else if is("false") || is("off") {
        Ok(false)
    } else {
        Err(anyhow::anyhow!("Unrecognised flag value: {:?}", value))
    }
}

pub async fn fetch_status(api: &dyn DeviceApi, feature: Feature) -> Result<bool> {
    let body = api.get_text(feature.status_path()).await?;
    parse_flag(&body).with_context(|| format!("Bad response from {}", feature.status_path()))
}

pub fn flashlight_path(on: bool) -> String {
    format!("/flashlight?state={}", if on { "on" } else { "off" })
}

pub fn stream_path(cache_buster: i64) -> String {
    format!("/stream?t={}", cache_buster)
}

/// HTTP client for a device at `base_url`
///
/// Control requests give up after `request_timeout`; the stream request has
/// no deadline since it stays open for as long as frames flow.
pub struct HttpDevice {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpDevice {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid device URL: {}", base_url))?;
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    fn url(&self, path_and_query: &str) -> Result<Url> {
        self.base_url
            .join(path_and_query)
            .with_context(|| format!("Invalid request path: {}", path_and_query))
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn get_text(&self, path_and_query: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(path_and_query)?)
            .timeout(self.request_timeout)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path_and_query))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", path_and_query))?;

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", path_and_query))
    }
}

#[async_trait]
impl FrameSource for HttpDevice {
    async fn open(&self, path_and_query: &str) -> Result<StreamBody> {
        let response = self
            .client
            .get(self.url(path_and_query)?)
            .send()
            .await
            .context("Stream request failed")?
            .error_for_status()
            .context("Stream request returned an error status")?;

        let boundary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_boundary);

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from))
            .boxed();

        Ok(StreamBody { boundary, chunks })
    }
}

/// Extract the multipart boundary from a `Content-Type` header value
pub fn parse_boundary(content_type: &str) -> Option<String> {
    BOUNDARY_RE
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|b| !b.is_empty())
}
