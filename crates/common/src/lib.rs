//! Common types shared by the token server crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
