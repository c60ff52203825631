//! The photo feed: a paginated local cache kept in sync with the server.
//!
//! - [`Photo`] - one feed item, an immutable value
//! - [`FeedSynchronizer`] - pagination, like/unlike writes, and reset
//!
//! # Example
//!
//! ```ignore
//! let feed = session.feed();
//! feed.load_next_page().await?;
//! if let Some(first) = feed.items().first() {
//!     feed.toggle_like(&first.id).await?;
//! }
//! ```

mod photo;
mod synchronizer;

pub use photo::{InvalidPhoto, Photo, Size};
pub use synchronizer::{FeedError, FeedSynchronizer, PageCursor, STALL_THRESHOLD};
