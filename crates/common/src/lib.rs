//! Common types for the Roblox job pool proxy

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, redact_url};
