//! Shared HTTP plumbing for the feed clients.
//!
//! One GET per fetch, no retries. Transport failures, non-2xx statuses and
//! oversized bodies all map onto [`FetchError`].

use crate::endpoint::parse_endpoint;
use chrono::{FixedOffset, Offset, Utc};
use hydrosync_core::{AppConfig, Error, FetchError, SourceTag};
use reqwest::{Client, header};
use std::time::{Duration, Instant};

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "hydrosync/0.1";

/// Feed bodies are a few hundred KB; anything far larger is not a station list.
const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for one feed client.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
    /// Offset applied to timestamps published without one.
    pub utc_offset: FixedOffset,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_millis(20_000),
            max_bytes: DEFAULT_MAX_BYTES,
            utc_offset: FixedOffset::east_opt(3600).unwrap_or_else(|| Utc.fix()),
        }
    }

    /// Settings for `source` taken from the application config.
    pub fn from_app_config(config: &AppConfig, source: SourceTag) -> Self {
        let url = match source {
            SourceTag::Hydro => &config.hydro_url,
            SourceTag::Hydro2 => &config.hydro2_url,
        };
        Self {
            url: url.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            max_bytes: DEFAULT_MAX_BYTES,
            utc_offset: config.source_offset(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FeedHttp {
    http: Client,
    url: url::Url,
    source: SourceTag,
    max_bytes: usize,
}

impl FeedHttp {
    pub(crate) fn new(source: SourceTag, config: &FeedConfig) -> Result<Self, Error> {
        let url = parse_endpoint(&config.url).map_err(|e| Error::Config(format!("{source} endpoint: {e}")))?;

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, url, source, max_bytes: config.max_bytes })
    }

    pub(crate) fn url(&self) -> &url::Url {
        &self.url
    }

    /// GET the feed and return the raw body.
    pub(crate) async fn get_body(&self) -> Result<Vec<u8>, FetchError> {
        let start = Instant::now();

        let response = self
            .http
            .get(self.url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        tracing::debug!(source = %self.source, status = status.as_u16(), "feed responded");

        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16() });
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_bytes
        {
            return Err(FetchError::Malformed(format!("{len} bytes exceeds {}", self.max_bytes)));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        if bytes.len() > self.max_bytes {
            return Err(FetchError::Malformed(format!("{} bytes exceeds {}", bytes.len(), self.max_bytes)));
        }

        tracing::debug!(
            source = %self.source,
            bytes = bytes.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "feed body received"
        );

        Ok(bytes.to_vec())
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() { FetchError::Timeout } else { FetchError::Network(err.to_string()) }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Single-shot local HTTP server for client tests.

    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and return the URL to request.
    pub(crate) async fn serve_once(status_line: &'static str, body: String) -> String {
        serve_after(status_line, body, Duration::ZERO).await
    }

    pub(crate) async fn serve_after(status_line: &'static str, body: String, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}/api/data/feed/")
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{serve_after, serve_once};
    use super::*;

    fn feed(url: &str) -> FeedHttp {
        FeedHttp::new(SourceTag::Hydro, &FeedConfig::new(url)).unwrap()
    }

    #[test]
    fn test_feed_config_defaults() {
        let config = FeedConfig::new("https://danepubliczne.imgw.pl/api/data/hydro/");
        assert_eq!(config.user_agent, "hydrosync/0.1");
        assert_eq!(config.timeout, Duration::from_millis(20_000));
        assert_eq!(config.utc_offset.local_minus_utc(), 3600);
    }

    #[test]
    fn test_from_app_config() {
        let app = AppConfig { timeout_ms: 5_000, source_utc_offset_minutes: 120, ..Default::default() };
        let config = FeedConfig::from_app_config(&app, SourceTag::Hydro2);
        assert_eq!(config.url, app.hydro2_url);
        assert_eq!(config.timeout, Duration::from_millis(5_000));
        assert_eq!(config.utc_offset.local_minus_utc(), 7200);
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = FeedHttp::new(SourceTag::Hydro, &FeedConfig::new("file:///etc/passwd"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_get_body() {
        let url = serve_once("200 OK", "[]".to_string()).await;
        let body = feed(&url).get_body().await.unwrap();
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let url = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let err = feed(&url).get_body().await.unwrap_err();
        assert_eq!(err, FetchError::Http { status: 503 });
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let url = serve_once("200 OK", "x".repeat(64)).await;
        let mut config = FeedConfig::new(url);
        config.max_bytes = 16;
        let err = FeedHttp::new(SourceTag::Hydro, &config).unwrap().get_body().await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = feed(&format!("http://{addr}/")).get_body().await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let url = serve_after("200 OK", "[]".to_string(), Duration::from_secs(5)).await;
        let mut config = FeedConfig::new(url);
        config.timeout = Duration::from_millis(200);
        let err = FeedHttp::new(SourceTag::Hydro, &config).unwrap().get_body().await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }
}
