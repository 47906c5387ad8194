use url::Url;

use crate::error::AskApiError;

/// Default service origin.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
/// Streaming ask endpoint path.
pub const ASK_PATH: &str = "/api/ask";
/// Liveness probe path.
pub const HEALTH_PATH: &str = "/api/health";

/// Resolve the ask endpoint for a base URL.
///
/// A blank base falls back to [`DEFAULT_BASE_URL`]. Any path already on the
/// base is kept as a prefix. A base that already names an endpoint
/// (`/api/ask` or `/api/health`) has that path swapped, never doubled.
pub fn ask_endpoint(base_url: &str) -> Result<Url, AskApiError> {
    endpoint(base_url, ASK_PATH)
}

pub fn health_endpoint(base_url: &str) -> Result<Url, AskApiError> {
    endpoint(base_url, HEALTH_PATH)
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, AskApiError> {
    let base = if base_url.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        base_url.trim()
    };

    let mut url =
        Url::parse(base).map_err(|error| AskApiError::InvalidBaseUrl(format!("{base}: {error}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AskApiError::InvalidBaseUrl(format!(
            "{base}: unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let trimmed = url.path().trim_end_matches('/');
    let prefix = [ASK_PATH, HEALTH_PATH]
        .into_iter()
        .find_map(|known| trimmed.strip_suffix(known))
        .unwrap_or(trimmed)
        .to_owned();
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
