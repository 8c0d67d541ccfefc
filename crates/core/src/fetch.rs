//! Source fetcher contract.
//!
//! Each upstream feed sits behind a [`SourceFetcher`]. Implementations do one
//! outbound request per call, never retry, and report every failure as a
//! [`FetchError`] value. Retry and fallback policy live in the service.

use crate::model::{RawStationReading, SourceTag};
use async_trait::async_trait;

/// Why a single upstream fetch failed.
///
/// `Clone` so a coalesced refresh can hand the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx response.
    #[error("HTTP error: {status}")]
    Http { status: u16 },

    /// Request exceeded its time budget.
    #[error("request timeout")]
    Timeout,

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Body was not a list of station objects or missed required fields.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One upstream hydrological feed.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Which feed this fetcher reads.
    fn source(&self) -> SourceTag;

    /// Fetch and normalize the feed's current station list.
    async fn fetch(&self) -> Result<Vec<RawStationReading>, FetchError>;
}

/// Serves a fixed snapshot instead of calling an upstream.
///
/// Useful for replaying a captured payload and for exercising the service
/// without network access.
#[derive(Debug, Clone)]
pub struct StaticFetcher {
    source: SourceTag,
    response: Result<Vec<RawStationReading>, FetchError>,
}

impl StaticFetcher {
    pub fn new(source: SourceTag, readings: Vec<RawStationReading>) -> Self {
        Self { source, response: Ok(readings) }
    }

    pub fn failing(source: SourceTag, error: FetchError) -> Self {
        Self { source, response: Err(error) }
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    fn source(&self) -> SourceTag {
        self.source
    }

    async fn fetch(&self) -> Result<Vec<RawStationReading>, FetchError> {
        self.response.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher() {
        let fetcher = StaticFetcher::new(SourceTag::Hydro, vec![RawStationReading::new("1", "Kraków", SourceTag::Hydro)]);
        assert_eq!(fetcher.source(), SourceTag::Hydro);
        assert_eq!(fetcher.fetch().await.unwrap().len(), 1);

        let failing = StaticFetcher::failing(SourceTag::Hydro2, FetchError::Timeout);
        assert_eq!(failing.fetch().await, Err(FetchError::Timeout));
    }

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(FetchError::Http { status: 503 }.to_string(), "HTTP error: 503");
        assert!(FetchError::Malformed("expected array".into()).to_string().contains("expected array"));
    }
}
