//! Utility functions shared by the library and the CLI.
//!
//! - **URL validation**: base URLs must be HTTPS (plain HTTP only on loopback);
//!   URLs handed to the system opener must be http(s) with a host
//! - **Text processing**: sanitizing and width-truncating server-provided text
//!   before it reaches the terminal

mod text;
mod url_validator;

pub use text::{display_width, strip_control_chars, truncate_to_width};
pub use url_validator::{validate_base_url, validate_url_for_open, UrlValidationError};
