use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::auth::Token;

/// Largest response body accepted from the API (5MB).
pub const MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// Transport-level failures shared by every service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, DNS, or TLS failure
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    /// Response with a non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Body was not the JSON shape we expected
    #[error("Unexpected response body: {0}")]
    Decode(String),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Cannot build request URL from {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(err)
        }
    }
}

/// Redirect policy: at most 3 hops, no loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url.path(),
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Shared HTTP client bound to the API base URL.
///
/// Cheap to clone: `reqwest::Client` is reference-counted internally.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_base: Url,
    timeout: Duration,
}

impl ApiClient {
    /// Build a client for `api_base` (already validated, see
    /// [`crate::util::validate_base_url`]).
    pub fn new(api_base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .user_agent(concat!("imagefeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            http,
            api_base,
            timeout,
        })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// `api_base` with `segments` appended, each percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and return the body of a 2xx response.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Timeout`] - no response within the configured timeout
    /// - [`ApiError::Network`] - connection or TLS errors
    /// - [`ApiError::HttpStatus`] - non-2xx response
    /// - [`ApiError::ResponseTooLarge`] - body exceeded [`MAX_BODY_SIZE`]
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        token: Option<&Token>,
    ) -> Result<Vec<u8>, ApiError> {
        // Only the path is logged: the token exchange carries the client
        // secret in its query string.
        let path = url.path().to_string();
        let mut request = self.http.request(method.clone(), url);
        if let Some(token) = token {
            request = request.bearer_auth(token.expose());
        }

        tracing::debug!(%method, path = %path, "Sending request");
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%method, path = %path, status = status.as_u16(), "Request failed");
            return Err(ApiError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, MAX_BODY_SIZE).await
    }

    /// Authenticated GET decoded as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url, token: &Token) -> Result<T, ApiError> {
        let bytes = self.send(Method::GET, url, Some(token)).await?;
        decode(&bytes)
    }
}

/// Decode a JSON body, mapping serde errors to [`ApiError::Decode`].
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: trust Content-Length when present
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        let base = crate::util::validate_base_url(&server.uri()).unwrap();
        ApiClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let base = Url::parse("https://api.example.com/v1").unwrap();
        let client = ApiClient::new(base, Duration::from_secs(5)).unwrap();

        let url = client.endpoint(&["users", "jane doe"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users/jane%20doe");

        let url = client.endpoint(&["photos", "a/b", "like"]).unwrap();
        assert_eq!(url.path(), "/v1/photos/a%2Fb/like");
    }

    #[tokio::test]
    async fn test_send_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("Authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let token = Token::new("tok-123");
        let body = client
            .send(Method::GET, client.endpoint(&["me"]).unwrap(), Some(&token))
            .await
            .unwrap();
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .send(Method::DELETE, client.endpoint(&["x"]).unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::HttpStatus(401)));
    }

    #[tokio::test]
    async fn test_get_json_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let token = Token::new("t");
        let result: Result<serde_json::Value, _> =
            client.get_json(client.endpoint(&["me"]).unwrap(), &token).await;
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_BODY_SIZE + 1]))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .send(Method::GET, client.endpoint(&["big"]).unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ResponseTooLarge(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let base = crate::util::validate_base_url(&server.uri()).unwrap();
        let client = ApiClient::new(base, Duration::from_millis(200)).unwrap();
        let err = client
            .send(Method::GET, client.endpoint(&["slow"]).unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout));
    }
}
