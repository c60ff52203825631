//! HTTP plumbing for the photo API.
//!
//! - [`client`] - the shared `reqwest` client: bearer auth, timeouts, status
//!   checks, size-limited body reads, JSON decoding
//! - [`models`] - wire shapes of the JSON bodies the API returns
//!
//! Services build URLs with [`ApiClient::endpoint`] (or from the OAuth base for
//! the token exchange) and hand them to [`ApiClient::send`] /
//! [`ApiClient::get_json`].

mod client;
pub mod models;

pub use client::{ApiClient, ApiError, MAX_BODY_SIZE};
pub(crate) use client::decode;
