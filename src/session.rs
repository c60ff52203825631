//! Composition root: one instance of every service, wired to one bus.

use std::sync::Arc;

use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::auth::{AuthError, AuthExchange, TokenStore};
use crate::config::{Config, ConfigError, ACCESS_KEY_ENV, SECRET_KEY_ENV};
use crate::feed::FeedSynchronizer;
use crate::notify::EventBus;
use crate::profile::{Profile, ProfileError, ProfileFetcher};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(
        "OAuth client is not configured: set access_key and secret_key in config.toml or via {access} and {secret}",
        access = ACCESS_KEY_ENV,
        secret = SECRET_KEY_ENV
    )]
    NotConfigured,

    #[error("Code exchange failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Failed to load profile: {0}")]
    Profile(#[from] ProfileError),
}

/// Everything a front end needs, built once at startup.
///
/// Logging in without configured OAuth client credentials fails with
/// [`LoginError::NotConfigured`]; every other operation works with a token
/// that is already stored.
pub struct Session {
    bus: EventBus,
    tokens: Arc<dyn TokenStore>,
    auth: Option<AuthExchange>,
    profile: ProfileFetcher,
    feed: FeedSynchronizer,
}

impl Session {
    pub fn new(config: &Config, tokens: Arc<dyn TokenStore>) -> Result<Self, SessionError> {
        config.validate()?;
        let api = ApiClient::new(config.api_base()?, config.request_timeout())?;
        let bus = EventBus::new();

        let auth = match config.oauth_settings() {
            Ok(settings) => Some(AuthExchange::new(
                api.clone(),
                Arc::new(settings),
                Arc::clone(&tokens),
            )),
            Err(ConfigError::MissingCredential(field, _)) => {
                tracing::debug!(field, "OAuth client not configured, login disabled");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            profile: ProfileFetcher::new(api.clone(), Arc::clone(&tokens), bus.clone()),
            feed: FeedSynchronizer::new(api, Arc::clone(&tokens), bus.clone(), config.page_size),
            auth,
            tokens,
            bus,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// `None` when the OAuth client credentials are missing.
    pub fn auth(&self) -> Option<&AuthExchange> {
        self.auth.as_ref()
    }

    pub fn profile(&self) -> &ProfileFetcher {
        &self.profile
    }

    pub fn feed(&self) -> &FeedSynchronizer {
        &self.feed
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.get().is_some()
    }

    /// Exchange `code`, then load the profile and avatar.
    ///
    /// A failed avatar lookup is logged and does not fail the login.
    pub async fn login(&self, code: &str) -> Result<Profile, LoginError> {
        let auth = self.auth.as_ref().ok_or(LoginError::NotConfigured)?;
        let token = auth.exchange(code).await?;
        let profile = self.profile.fetch_profile(&token).await?;
        self.fetch_avatar(&profile.username).await;

        tracing::info!(username = %profile.username, "Signed in");
        Ok(profile)
    }

    /// Reload profile and avatar with the stored token.
    pub async fn refresh_profile(&self) -> Result<Profile, ProfileError> {
        let token = self.tokens.get().ok_or(ProfileError::Unauthenticated)?;
        let profile = self.profile.fetch_profile(&token).await?;
        self.fetch_avatar(&profile.username).await;
        Ok(profile)
    }

    /// Forget the token, the feed, and the profile.
    pub fn logout(&self) {
        self.tokens.clear();
        self.feed.reset();
        self.profile.clear();
        tracing::info!("Signed out");
    }

    async fn fetch_avatar(&self, username: &str) {
        if let Err(e) = self.profile.fetch_avatar_url(username).await {
            tracing::warn!(username = %username, error = %e, "Failed to load avatar");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .field("login_enabled", &self.auth.is_some())
            .field("feed", &self.feed)
            .field("profile", &self.profile)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryTokenStore, Token};
    use crate::notify::{Event, EventKind};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, with_credentials: bool) -> Config {
        Config {
            api_base_url: server.uri(),
            auth_base_url: server.uri(),
            access_key: with_credentials.then(|| "client-id".to_string()),
            secret_key: with_credentials.then(|| "client-secret".to_string()),
            ..Config::default()
        }
    }

    async fn mount_login(server: &MockServer, avatar_status: u16) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"access_token":"bearer"}"#))
            .expect(1)
            .mount(server)
            .await;
        mount_profile(server, avatar_status).await;
    }

    async fn mount_profile(server: &MockServer, avatar_status: u16) {
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"username":"jdoe","first_name":"Jane","last_name":"Doe"}"#),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/jdoe"))
            .respond_with(
                ResponseTemplate::new(avatar_status)
                    .set_body_string(r#"{"profile_image":{"small":"https://img/a"}}"#),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_stores_token_and_loads_profile() {
        let server = MockServer::start().await;
        mount_login(&server, 200).await;

        let store = Arc::new(MemoryTokenStore::new());
        let session = Session::new(&config_for(&server, true), store.clone()).unwrap();
        assert!(!session.is_authenticated());

        let profile = session.login("code-1").await.unwrap();
        assert_eq!(profile.name, "Jane Doe");
        assert!(session.is_authenticated());
        assert_eq!(store.get().unwrap().expose(), "bearer");
        assert_eq!(session.profile().avatar_url().as_deref(), Some("https://img/a"));
    }

    #[tokio::test]
    async fn test_login_survives_avatar_failure() {
        let server = MockServer::start().await;
        mount_login(&server, 404).await;

        let session = Session::new(&config_for(&server, true), Arc::new(MemoryTokenStore::new())).unwrap();
        let profile = session.login("code-1").await.unwrap();
        assert_eq!(profile.username, "jdoe");
        assert!(session.profile().avatar_url().is_none());
    }

    #[tokio::test]
    async fn test_login_requires_client_credentials() {
        let server = MockServer::start().await;
        let session = Session::new(&config_for(&server, false), Arc::new(MemoryTokenStore::new())).unwrap();
        assert!(session.auth().is_none());
        assert!(matches!(
            session.login("code").await,
            Err(LoginError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let server = MockServer::start().await;
        mount_login(&server, 200).await;
        Mock::given(method("GET"))
            .and(path("/photos"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"id":"p","width":1,"height":1,"urls":{"thumb":"t","full":"f"}}]"#,
            ))
            .mount(&server)
            .await;

        let session = Session::new(&config_for(&server, true), Arc::new(MemoryTokenStore::new())).unwrap();
        session.login("code-1").await.unwrap();
        session.feed().load_next_page().await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = session
            .bus()
            .subscribe(EventKind::FeedChanged, move |e| sink.lock().unwrap().push(e.clone()));

        session.logout();
        assert!(!session.is_authenticated());
        assert!(session.feed().items().is_empty());
        assert!(session.profile().profile().is_none());
        assert!(session.profile().avatar_url().is_none());
        assert_eq!(*events.lock().unwrap(), vec![Event::FeedCleared]);
    }

    #[tokio::test]
    async fn test_refresh_profile_uses_stored_token() {
        let server = MockServer::start().await;
        mount_profile(&server, 200).await;

        let store = Arc::new(MemoryTokenStore::with_token(Token::new("stored")));
        let session = Session::new(&config_for(&server, false), store).unwrap();
        let profile = session.refresh_profile().await.unwrap();
        assert_eq!(profile.login_name, "@jdoe");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let config = Config {
            api_base_url: "http://api.example.com".into(),
            ..Config::default()
        };
        let err = Session::new(&config, Arc::new(MemoryTokenStore::new())).unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::BaseUrl { .. })));
    }
}
