//! Access token pool with per-app refresh loops and disk persistence
//!
//! Keeps one access token per registered app credential, refreshes each
//! proactively before it expires, and mirrors the last known tokens to a
//! JSON file so a restart can serve straight from disk.
//!
//! Token lifecycle:
//! 1. `TokenPool::put()` registers a holder and seeds it from `DiskStore`
//! 2. `TokenPool::start_all()` gives every holder its own refresh loop
//! 3. Each loop refreshes immediately, then whenever the remaining validity
//!    drops below the refresh threshold
//! 4. The serving path reads tokens through `TokenPool::token()`
//! 5. `TokenPool::close()` saves a snapshot of every token, then stops and
//!    joins every loop

pub mod error;
pub mod holder;
pub mod pool;
pub mod record;
pub mod store;

mod refresh;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use holder::{RefreshSettings, TokenHolder, TokenLookup};
pub use pool::TokenPool;
pub use record::TokenRecord;
pub use store::DiskStore;
