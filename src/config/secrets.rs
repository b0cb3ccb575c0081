//! Secret handling utilities.
//!
//! Re-exports secrecy types used for the hook token.

pub use secrecy::{ExposeSecret, SecretString};
