//! Client library for an OAuth2-protected photo feed.
//!
//! The crate is organized around a small set of services that a [`Session`]
//! wires together once at startup:
//!
//! - [`auth`] - token storage, authorization-code exchange, first-launch reset
//! - [`profile`] - the signed-in user's profile and avatar URL
//! - [`feed`] - the paginated photo cache and like/unlike mutations
//! - [`notify`] - the event bus that announces every state change
//! - [`api`] - HTTP plumbing shared by all of the above
//!
//! # Example
//!
//! ```ignore
//! use imagefeed::{auth::MemoryTokenStore, Config, EventKind, Session};
//! use std::sync::Arc;
//!
//! let session = Session::new(&Config::default(), Arc::new(MemoryTokenStore::new()))?;
//! let _sub = session.bus().subscribe(EventKind::FeedChanged, |event| println!("{event:?}"));
//! session.feed().load_next_page().await?;
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod feed;
pub mod notify;
pub mod profile;
pub mod session;
pub mod util;

mod flight;

pub use config::{Config, ConfigError};
pub use notify::{Event, EventBus, EventKind, Subscription};
pub use session::{LoginError, Session, SessionError};
