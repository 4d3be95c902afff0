//! Error types for pool, holder and store operations

/// Errors from token pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no app id in credential")]
    EmptyAppId,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no valid token fetched yet for {0}")]
    NotFetched(String),

    #[error("token store I/O error: {0}")]
    Io(String),

    #[error("token store encoding error: {0}")]
    Parse(String),

    #[error("token fetch failed: {0}")]
    Fetch(#[from] wechat_auth::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
