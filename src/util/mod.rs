//! Utility functions shared by the feed readers.
//!
//! - **URL validation**: scheme and host policy for source URLs (SSRF guard)
//! - **Text cleanup**: control-character stripping for feed-supplied text

mod text;
mod url_validator;

pub use text::{single_line, strip_control_chars};
pub use url_validator::{UrlPolicy, UrlValidationError};
