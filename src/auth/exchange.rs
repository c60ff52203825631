use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Method;
use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use super::{Token, TokenStore};
use crate::api::models::TokenResponse;
use crate::api::{ApiClient, ApiError};
use crate::config::OAuthSettings;
use crate::flight::{self, Flight};

#[derive(Debug, Error)]
pub enum AuthError {
    /// The code is already being exchanged, or was exchanged before.
    #[error("Authorization code was already used")]
    DuplicateRequest,

    /// A newer code replaced this exchange before it finished.
    #[error("Code exchange was superseded")]
    Cancelled,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Exchanging,
    Succeeded,
    Failed,
}

struct State {
    phase: ExchangePhase,
    /// Every code that was ever sent; authorization codes are one-shot.
    consumed: HashSet<String>,
    flight: Flight,
}

struct Inner {
    api: ApiClient,
    settings: Arc<OAuthSettings>,
    tokens: Arc<dyn TokenStore>,
    state: Mutex<State>,
}

/// Turns a one-time authorization code into a bearer token.
///
/// At most one exchange runs at a time. A new code supersedes the running
/// exchange; a code that was already sent is rejected without touching the
/// network. Only the exchange that is still current when its response
/// arrives writes to the [`TokenStore`].
#[derive(Clone)]
pub struct AuthExchange {
    inner: Arc<Inner>,
}

impl AuthExchange {
    pub fn new(api: ApiClient, settings: Arc<OAuthSettings>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                tokens,
                state: Mutex::new(State {
                    phase: ExchangePhase::Idle,
                    consumed: HashSet::new(),
                    flight: Flight::default(),
                }),
            }),
        }
    }

    /// Exchange `code` for a token and store it.
    ///
    /// The code is accepted (or rejected as a duplicate) when this is
    /// called; only the HTTP round-trip happens when the returned future is
    /// awaited. Must be called within a Tokio runtime.
    pub fn exchange(&self, code: &str) -> impl Future<Output = Result<Token, AuthError>> + Send + 'static {
        let accepted = self.accept(code);
        async move { flight::join(accepted?, || AuthError::Cancelled).await }
    }

    pub fn phase(&self) -> ExchangePhase {
        self.inner.lock().phase
    }

    fn accept(&self, code: &str) -> Result<JoinHandle<Result<Token, AuthError>>, AuthError> {
        let mut state = self.inner.lock();
        if state.consumed.contains(code) {
            tracing::debug!("Rejecting already-used authorization code");
            return Err(AuthError::DuplicateRequest);
        }

        if state.flight.is_busy() {
            tracing::debug!("Superseding in-flight code exchange");
        }
        let generation = state.flight.begin();
        state.consumed.insert(code.to_string());
        state.phase = ExchangePhase::Exchanging;

        let inner = Arc::clone(&self.inner);
        let code = code.to_string();
        let handle = tokio::spawn(async move { inner.run(generation, code).await });
        state.flight.attach(handle.abort_handle());
        Ok(handle)
    }
}

impl std::fmt::Debug for AuthExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthExchange")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, generation: u64, code: String) -> Result<Token, AuthError> {
        let result = self.request_token(&code).await;

        let mut state = self.lock();
        if !state.flight.complete(generation) {
            tracing::debug!(generation, "Discarding superseded code exchange");
            return Err(AuthError::Cancelled);
        }

        match result {
            Ok(token) => {
                self.tokens.set(&token);
                state.phase = ExchangePhase::Succeeded;
                tracing::info!(fingerprint = %token.fingerprint(), "Authorization code exchanged");
                Ok(token)
            }
            Err(e) => {
                state.phase = ExchangePhase::Failed;
                tracing::warn!(error = %e, "Authorization code exchange failed");
                Err(e.into())
            }
        }
    }

    async fn request_token(&self, code: &str) -> Result<Token, ApiError> {
        let url = token_url(&self.settings, code)?;
        let body = self.api.send(Method::POST, url, None).await?;
        let response: TokenResponse = crate::api::decode(&body)?;
        Ok(Token::new(response.access_token))
    }
}

fn token_url(settings: &OAuthSettings, code: &str) -> Result<Url, ApiError> {
    let mut url = settings.auth_base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(settings.auth_base.to_string()))?
        .pop_if_empty()
        .extend(["oauth", "token"]);
    url.query_pairs_mut()
        .append_pair("client_id", &settings.access_key)
        .append_pair("client_secret", settings.secret_key.expose_secret())
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("code", code)
        .append_pair("grant_type", "authorization_code");
    Ok(url)
}
