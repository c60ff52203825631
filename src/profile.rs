//! The signed-in user's profile and avatar.
//!
//! Both lookups are last-caller-wins: starting one aborts the previous call
//! of the same kind, and only the most recent call may update the cached
//! value and announce it on the bus.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::api::models::{ProfileRecord, UserRecord};
use crate::api::{ApiClient, ApiError};
use crate::auth::{Token, TokenStore};
use crate::flight::{self, Flight};
use crate::notify::{Event, EventBus};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Profile request was superseded")]
    Cancelled,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    /// "First Last", or whichever part is present.
    pub name: String,
    /// `@username`
    pub login_name: String,
    pub bio: Option<String>,
}

impl From<ProfileRecord> for Profile {
    fn from(record: ProfileRecord) -> Self {
        let name = [record.first_name.as_deref(), record.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            login_name: format!("@{}", record.username),
            username: record.username,
            name,
            bio: record.bio.filter(|bio| !bio.trim().is_empty()),
        }
    }
}

#[derive(Default)]
struct State {
    profile: Option<Profile>,
    avatar_url: Option<String>,
    profile_flight: Flight,
    avatar_flight: Flight,
}

struct Inner {
    api: ApiClient,
    tokens: Arc<dyn TokenStore>,
    bus: EventBus,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct ProfileFetcher {
    inner: Arc<Inner>,
}

impl ProfileFetcher {
    pub fn new(api: ApiClient, tokens: Arc<dyn TokenStore>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                tokens,
                bus,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Last successfully fetched profile.
    pub fn profile(&self) -> Option<Profile> {
        self.inner.lock().profile.clone()
    }

    /// Last successfully fetched avatar URL.
    pub fn avatar_url(&self) -> Option<String> {
        self.inner.lock().avatar_url.clone()
    }

    /// `GET /me` with `token`; publishes [`Event::ProfileChanged`] on success.
    pub fn fetch_profile(
        &self,
        token: &Token,
    ) -> impl Future<Output = Result<Profile, ProfileError>> + Send + 'static {
        let mut state = self.inner.lock();
        let generation = state.profile_flight.begin();
        let inner = Arc::clone(&self.inner);
        let token = token.clone();
        let handle = tokio::spawn(async move { inner.run_profile(generation, token).await });
        state.profile_flight.attach(handle.abort_handle());
        drop(state);

        flight::join(handle, || ProfileError::Cancelled)
    }

    /// `GET /users/{username}` with the stored token; publishes
    /// [`Event::AvatarChanged`] on success.
    pub fn fetch_avatar_url(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<String, ProfileError>> + Send + 'static {
        let accepted = self.accept_avatar(username);
        async move { flight::join(accepted?, || ProfileError::Cancelled).await }
    }

    /// Abort both lookups and forget the cached values. Nothing is published.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.profile_flight.cancel();
        state.avatar_flight.cancel();
        state.profile = None;
        state.avatar_url = None;
    }

    fn accept_avatar(
        &self,
        username: &str,
    ) -> Result<JoinHandle<Result<String, ProfileError>>, ProfileError> {
        let mut state = self.inner.lock();
        let token = self.inner.tokens.get().ok_or(ProfileError::Unauthenticated)?;
        let generation = state.avatar_flight.begin();

        let inner = Arc::clone(&self.inner);
        let username = username.to_string();
        let handle =
            tokio::spawn(async move { inner.run_avatar(generation, username, token).await });
        state.avatar_flight.attach(handle.abort_handle());
        Ok(handle)
    }
}

impl std::fmt::Debug for ProfileFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ProfileFetcher")
            .field("profile", &state.profile)
            .field("avatar_url", &state.avatar_url)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_profile(&self, generation: u64, token: Token) -> Result<Profile, ProfileError> {
        let result = async {
            let url = self.api.endpoint(&["me"])?;
            self.api.get_json::<ProfileRecord>(url, &token).await
        }
        .await;

        let mut state = self.lock();
        if !state.profile_flight.complete(generation) {
            tracing::debug!(generation, "Discarding superseded profile response");
            return Err(ProfileError::Cancelled);
        }
        let profile = match result {
            Ok(record) => Profile::from(record),
            Err(e) => {
                tracing::debug!(error = %e, "Profile request failed");
                return Err(e.into());
            }
        };
        state.profile = Some(profile.clone());
        drop(state);

        tracing::debug!(username = %profile.username, "Profile updated");
        self.bus.publish(Event::ProfileChanged);
        Ok(profile)
    }

    async fn run_avatar(
        &self,
        generation: u64,
        username: String,
        token: Token,
    ) -> Result<String, ProfileError> {
        let result = async {
            let url = self.api.endpoint(&["users", username.as_str()])?;
            self.api.get_json::<UserRecord>(url, &token).await
        }
        .await;

        let mut state = self.lock();
        if !state.avatar_flight.complete(generation) {
            tracing::debug!(generation, "Discarding superseded avatar response");
            return Err(ProfileError::Cancelled);
        }
        let url = match result {
            Ok(record) => record.profile_image.small,
            Err(e) => {
                tracing::debug!(error = %e, username = %username, "Avatar request failed");
                return Err(e.into());
            }
        };
        state.avatar_url = Some(url.clone());
        drop(state);

        self.bus.publish(Event::AvatarChanged { url: url.clone() });
        Ok(url)
    }
}
