use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Method;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::Photo;
use crate::api::models::PhotoRecord;
use crate::api::{ApiClient, ApiError};
use crate::auth::{Token, TokenStore};
use crate::flight::{self, Flight};
use crate::notify::{Event, EventBus};

/// Consecutive page failures after which the feed counts as stalled.
pub const STALL_THRESHOLD: u32 = 3;

/// Errors returned by [`FeedSynchronizer`] operations.
#[derive(Debug, Error)]
pub enum FeedError {
    /// No bearer token in the store
    #[error("Not signed in")]
    Unauthenticated,
    /// The photo to like/unlike is not in the cache
    #[error("Photo {0} is not in the feed")]
    NotFound(String),
    /// Superseded by a newer like, or discarded by a reset
    #[error("Request was cancelled")]
    Cancelled,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Pagination position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based page requested by the next `load_next_page`.
    pub next_page: u32,
    pub page_size: u32,
    /// True from the moment a page request is accepted until it resolves.
    pub in_flight: bool,
}

impl PageCursor {
    fn new(page_size: u32) -> Self {
        Self {
            next_page: 1,
            page_size,
            in_flight: false,
        }
    }
}

struct State {
    /// Shared with readers; replaced copy-on-write.
    photos: Arc<Vec<Photo>>,
    ids: HashSet<String>,
    cursor: PageCursor,
    page_flight: Flight,
    like_flight: Flight,
    pending_like: Option<String>,
    consecutive_failures: u32,
}

struct Inner {
    api: ApiClient,
    tokens: Arc<dyn TokenStore>,
    bus: EventBus,
    state: Mutex<State>,
}

/// Owns the local photo cache and keeps it in step with the server.
///
/// # Concurrency
///
/// - At most one page request is in flight; further `load_next_page` calls
///   resolve immediately without a request.
/// - At most one like/unlike write is in flight; a new toggle (on any photo)
///   aborts the previous one, whose caller gets [`FeedError::Cancelled`].
/// - Pages and likes run independently of each other.
/// - State only changes after the server confirms, and only if the request
///   was not cancelled in the meantime.
///
/// The synchronous half of each operation (no-op check, token check,
/// cancelling the previous write) runs when the method is called; the
/// returned future only waits for the server. Call order is therefore
/// acceptance order. Methods that start requests must be called within a
/// Tokio runtime.
#[derive(Clone)]
pub struct FeedSynchronizer {
    inner: Arc<Inner>,
}

impl FeedSynchronizer {
    pub fn new(api: ApiClient, tokens: Arc<dyn TokenStore>, bus: EventBus, page_size: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                tokens,
                bus,
                state: Mutex::new(State {
                    photos: Arc::new(Vec::new()),
                    ids: HashSet::new(),
                    cursor: PageCursor::new(page_size),
                    page_flight: Flight::default(),
                    like_flight: Flight::default(),
                    pending_like: None,
                    consecutive_failures: 0,
                }),
            }),
        }
    }

    /// Snapshot of the cache, in server order.
    ///
    /// The snapshot is immutable; later appends and like flips produce a new
    /// vector and leave it untouched.
    pub fn items(&self) -> Arc<Vec<Photo>> {
        Arc::clone(&self.inner.lock().photos)
    }

    pub fn cursor(&self) -> PageCursor {
        self.inner.lock().cursor
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().cursor.in_flight
    }

    /// Id of the photo whose like/unlike write is in flight.
    pub fn pending_like(&self) -> Option<String> {
        self.inner.lock().pending_like.clone()
    }

    /// `true` once [`STALL_THRESHOLD`] page requests in a row have failed.
    /// Loading stays allowed; the next success clears it.
    pub fn is_stalled(&self) -> bool {
        self.inner.lock().consecutive_failures >= STALL_THRESHOLD
    }

    /// Fetch the next page and append it to the cache.
    ///
    /// Resolves `Ok(())` without a request while another page is loading.
    /// On success, publishes [`Event::FeedExtended`] and advances the
    /// cursor. On failure, nothing changes and the same page is requested
    /// next time.
    pub fn load_next_page(&self) -> impl Future<Output = Result<(), FeedError>> + Send + 'static {
        let accepted = self.accept_page();
        async move {
            match accepted? {
                Some(handle) => flight::join(handle, || FeedError::Cancelled).await,
                None => Ok(()),
            }
        }
    }

    /// Like the photo if unliked, unlike it if liked.
    ///
    /// The cached photo is replaced (and [`Event::ItemUpdated`] published)
    /// only once the server confirms.
    pub fn toggle_like(&self, id: &str) -> impl Future<Output = Result<(), FeedError>> + Send + 'static {
        let accepted = self.accept_like(id);
        async move { flight::join(accepted?, || FeedError::Cancelled).await }
    }

    /// Empty the cache, rewind the cursor, and abort in-flight requests.
    ///
    /// Always publishes [`Event::FeedCleared`]; calling it twice leaves the
    /// same state as calling it once.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        let page_cancelled = state.page_flight.cancel();
        let like_cancelled = state.like_flight.cancel();
        state.photos = Arc::new(Vec::new());
        state.ids.clear();
        state.cursor = PageCursor::new(state.cursor.page_size);
        state.pending_like = None;
        state.consecutive_failures = 0;
        drop(state);

        tracing::debug!(page_cancelled, like_cancelled, "Feed reset");
        self.inner.bus.publish(Event::FeedCleared);
    }

    fn accept_page(&self) -> Result<Option<JoinHandle<Result<(), FeedError>>>, FeedError> {
        let mut state = self.inner.lock();
        if state.cursor.in_flight {
            tracing::debug!(page = state.cursor.next_page, "Page already loading, ignoring");
            return Ok(None);
        }
        let token = self.inner.tokens.get().ok_or(FeedError::Unauthenticated)?;

        let generation = state.page_flight.begin();
        state.cursor.in_flight = true;
        let page = state.cursor.next_page;
        let per_page = state.cursor.page_size;

        let inner = Arc::clone(&self.inner);
        let handle =
            tokio::spawn(async move { inner.run_page(generation, page, per_page, token).await });
        state.page_flight.attach(handle.abort_handle());
        tracing::debug!(page, per_page, "Page request started");
        Ok(Some(handle))
    }

    fn accept_like(&self, id: &str) -> Result<JoinHandle<Result<(), FeedError>>, FeedError> {
        let mut state = self.inner.lock();
        let liked = state
            .photos
            .iter()
            .find(|photo| photo.id == id)
            .map(|photo| photo.liked)
            .ok_or_else(|| FeedError::NotFound(id.to_string()))?;

        let token = self.inner.tokens.get().ok_or(FeedError::Unauthenticated)?;

        if let Some(previous) = state.pending_like.take() {
            tracing::debug!(previous = %previous, next = %id, "Cancelling in-flight like");
        }
        let generation = state.like_flight.begin();
        state.pending_like = Some(id.to_string());

        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let handle = tokio::spawn(async move { inner.run_like(generation, id, liked, token).await });
        state.like_flight.attach(handle.abort_handle());
        Ok(handle)
    }
}

impl std::fmt::Debug for FeedSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("FeedSynchronizer")
            .field("len", &state.photos.len())
            .field("cursor", &state.cursor)
            .field("pending_like", &state.pending_like)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_page(&self, page: u32, per_page: u32, token: &Token) -> Result<Vec<PhotoRecord>, ApiError> {
        let mut url = self.api.endpoint(&["photos"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        self.api.get_json(url, token).await
    }

    async fn run_page(&self, generation: u64, page: u32, per_page: u32, token: Token) -> Result<(), FeedError> {
        let result = self.fetch_page(page, per_page, &token).await;

        let mut state = self.lock();
        if !state.page_flight.complete(generation) {
            tracing::debug!(page, generation, "Discarding stale page response");
            return Err(FeedError::Cancelled);
        }
        state.cursor.in_flight = false;

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                state.consecutive_failures += 1;
                let failures = state.consecutive_failures;
                drop(state);
                if failures >= STALL_THRESHOLD {
                    tracing::warn!(page, failures, error = %e, "Feed pagination is stalled");
                } else {
                    tracing::debug!(page, failures, error = %e, "Page request failed");
                }
                return Err(e.into());
            }
        };

        state.consecutive_failures = 0;
        let received = records.len();
        let State { photos, ids, .. } = &mut *state;
        let photos = Arc::make_mut(photos);
        for record in records {
            if ids.contains(&record.id) {
                tracing::debug!(id = %record.id, "Skipping photo already in feed");
                continue;
            }
            match Photo::try_from(record) {
                Ok(photo) => {
                    ids.insert(photo.id.clone());
                    photos.push(photo);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping invalid photo record"),
            }
        }
        let total_count = photos.len();
        state.cursor.next_page += 1;
        drop(state);

        tracing::debug!(page, received, total_count, "Page appended");
        self.bus.publish(Event::FeedExtended { total_count });
        Ok(())
    }

    async fn run_like(&self, generation: u64, id: String, liked: bool, token: Token) -> Result<(), FeedError> {
        let method = if liked { Method::DELETE } else { Method::POST };
        let result = async {
            let url = self.api.endpoint(&["photos", id.as_str(), "like"])?;
            self.api.send(method, url, Some(&token)).await
        }
        .await;

        let mut state = self.lock();
        if !state.like_flight.complete(generation) {
            tracing::debug!(id = %id, generation, "Discarding cancelled like response");
            return Err(FeedError::Cancelled);
        }
        state.pending_like = None;

        if let Err(e) = result {
            tracing::debug!(id = %id, error = %e, "Like request failed");
            return Err(e.into());
        }

        let Some(index) = state.photos.iter().position(|photo| photo.id == id) else {
            return Err(FeedError::NotFound(id));
        };
        let photos = Arc::make_mut(&mut state.photos);
        photos[index] = photos[index].with_liked(!liked);
        drop(state);

        tracing::debug!(id = %id, index, liked = !liked, "Like confirmed");
        self.bus.publish(Event::ItemUpdated { index, id });
        Ok(())
    }
}
