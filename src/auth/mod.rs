//! OAuth2 credentials: storage, code exchange, and the browser hand-off.
//!
//! - [`TokenStore`] - zero-or-one bearer token, file-backed or in memory
//! - [`AuthExchange`] - single-flight authorization-code exchange
//! - [`authorize_url`] / [`extract_code`] - the user-facing half of the flow
//! - [`reset_on_first_launch`] - drops tokens left over from a previous install

mod authorize;
mod exchange;
mod launch;
mod token_store;

pub use authorize::{authorize_url, extract_code, NATIVE_REDIRECT_PATH};
pub use exchange::{AuthError, AuthExchange, ExchangePhase};
pub use launch::{reset_on_first_launch, LAUNCH_MARKER};
pub use token_store::{FileTokenStore, MemoryTokenStore, Token, TokenStore};
