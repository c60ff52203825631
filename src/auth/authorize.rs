use url::Url;

use crate::api::ApiError;
use crate::config::OAuthSettings;

/// Path the provider redirects to once the user grants access.
pub const NATIVE_REDIRECT_PATH: &str = "/oauth/authorize/native";

/// Page the user visits to grant access.
///
/// The configured scope is `+`-separated; it is sent as a space-separated
/// value, which form-encoding turns back into `+`.
pub fn authorize_url(settings: &OAuthSettings) -> Result<Url, ApiError> {
    let mut url = settings.auth_base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(settings.auth_base.to_string()))?
        .pop_if_empty()
        .extend(["oauth", "authorize"]);
    url.query_pairs_mut()
        .append_pair("client_id", &settings.access_key)
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &settings.access_scope.replace('+', " "));
    Ok(url)
}

/// Pull the authorization code out of what the user pasted.
///
/// Accepts a bare code or the full redirect URL. Returns `None` for empty
/// input, for URLs without a `code` item, and for text that is neither.
///
/// ```
/// use imagefeed::auth::extract_code;
///
/// assert_eq!(extract_code("  abc123 ").as_deref(), Some("abc123"));
/// assert_eq!(
///     extract_code("https://unsplash.com/oauth/authorize/native?code=xyz").as_deref(),
///     Some("xyz")
/// );
/// assert_eq!(extract_code("not a code"), None);
/// ```
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    match Url::parse(input) {
        Ok(url) => {
            if url.path() != NATIVE_REDIRECT_PATH {
                tracing::debug!(path = %url.path(), "Redirect URL has an unexpected path");
            }
            url.query_pairs()
                .find(|(key, _)| key == "code")
                .map(|(_, value)| value.into_owned())
                .filter(|code| !code.is_empty())
        }
        Err(_) if input.chars().all(is_code_char) => Some(input.to_string()),
        Err(_) => None,
    }
}

fn is_code_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
}
