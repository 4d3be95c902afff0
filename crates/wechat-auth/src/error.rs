//! Error types for token fetches

/// Errors from a single token fetch.
///
/// `Http` covers everything that went wrong before a body could be read
/// (connect, TLS, timeout). `Api` is the remote service refusing the
/// request. The two are logged differently but both leave the cached token
/// untouched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token API error {errcode}: {errmsg}")]
    Api { errcode: i64, errmsg: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

impl Error {
    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Http(_) => "http_error",
            Error::Api { .. } => "api_error",
            Error::MalformedResponse(_) => "malformed",
        }
    }
}

/// Result alias for token fetches.
pub type Result<T> = std::result::Result<T, Error>;
