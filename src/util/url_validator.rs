use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons a configured base URL is refused.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Bearer tokens and client secrets would travel in cleartext.
    #[error("Insecure base URL {0}: HTTPS required (except loopback for testing)")]
    Insecure(String),
    #[error("URL cannot be used as a base: {0}")]
    NotABase(String),
}

/// Validates an API or auth base URL.
///
/// Accepts `https://` anywhere and `http://` only for loopback hosts
/// (`localhost`, `127.0.0.0/8`, `::1`), which is what local mock servers use.
/// Query strings and fragments are dropped; a trailing slash is removed so
/// path segments can be appended uniformly.
///
/// # Examples
///
/// ```
/// use imagefeed::util::validate_base_url;
///
/// assert!(validate_base_url("https://api.unsplash.com").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// assert!(validate_base_url("http://api.example.com").is_err());
/// assert!(validate_base_url("ftp://example.com").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_loopback_host(&url) {
                return Err(UrlValidationError::Insecure(url.to_string()));
            }
            tracing::warn!(base_url = %url, "Using non-HTTPS base URL (loopback only)");
        }
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.cannot_be_a_base() {
        return Err(UrlValidationError::NotABase(url.to_string()));
    }

    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
    }

    Ok(url)
}

/// Validates a server-provided URL before handing it to the system opener.
///
/// Only absolute `http`/`https` URLs with a host are passed on; anything else
/// (`file:`, `javascript:`, a bare `-flag`) could be interpreted by the opener
/// as something other than a web page.
pub fn validate_url_for_open(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::NotABase(url.to_string()));
    }
    Ok(url)
}

fn is_loopback_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }

    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
