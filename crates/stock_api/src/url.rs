use url::Url;

use crate::error::ApiError;

/// Default base URL for a locally running stock platform.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
/// Versioned API prefix every route lives under.
pub const API_PREFIX: &str = "/api/v1";

/// Normalize a base URL so it ends with [`API_PREFIX`] exactly once.
///
/// Blank input falls back to [`DEFAULT_BASE_URL`]; trailing slashes are dropped.
pub fn normalize_api_base(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(API_PREFIX) {
        return trimmed.to_string();
    }
    format!("{trimmed}{API_PREFIX}")
}

/// Join path segments (percent-encoded) and query pairs onto a normalized base.
pub fn endpoint_url(
    base: &str,
    segments: &[&str],
    query: &[(&str, String)],
) -> Result<Url, ApiError> {
    let mut url =
        Url::parse(base).map_err(|error| ApiError::InvalidBaseUrl(format!("{base}: {error}")))?;

    url.path_segments_mut()
        .map_err(|()| ApiError::InvalidBaseUrl(format!("{base}: cannot be a base")))?
        .pop_if_empty()
        .extend(segments);

    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}
