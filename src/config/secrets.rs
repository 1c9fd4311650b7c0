//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers hold the database URL (and any
//! future credentials) behind a redacting wrapper instead of a bare String.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
