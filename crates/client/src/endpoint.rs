//! Feed endpoint validation.

/// Error type for endpoint validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EndpointError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Parse a configured feed URL.
///
/// Whitespace is trimmed and the fragment dropped. Only `http` and `https`
/// are accepted; a missing scheme is not guessed.
pub fn parse_endpoint(input: &str) -> Result<url::Url, EndpointError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EndpointError::Empty);
    }

    let mut parsed = url::Url::parse(trimmed).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(EndpointError::UnsupportedScheme(scheme.to_string())),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(EndpointError::InvalidUrl(format!("missing host in {trimmed}")));
    }

    parsed.set_fragment(None);
    Ok(parsed)
}
