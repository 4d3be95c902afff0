//! App credentials for the token API
//!
//! A credential is the `appId`/`appSecret` pair issued by the platform. It is
//! immutable once registered with the pool and owned by exactly one token
//! holder. The secret is wrapped in `Secret` so it never reaches logs.

use common::Secret;

/// A single app's credential pair.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Platform app identifier, the pool key
    pub app_id: String,
    /// App secret sent to the token endpoint
    pub app_secret: Secret<String>,
}

impl Credential {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: Secret::new(app_secret.into()),
        }
    }

    pub fn from_secret(app_id: impl Into<String>, app_secret: Secret<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret,
        }
    }
}
