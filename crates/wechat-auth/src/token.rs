//! Single-shot access token fetch
//!
//! One call to the token endpoint per refresh attempt:
//! `GET {endpoint}?grant_type=client_credential&appid=..&secret=..`
//!
//! The endpoint answers with either `{"access_token", "expires_in"}` or
//! `{"errcode", "errmsg"}`, and does not reliably signal failure through the
//! HTTP status. Success is therefore decided by the presence of
//! `access_token` alone. There are no retries here; the caller's refresh
//! schedule decides when to try again.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::GRANT_TYPE;
use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Successful response from the token endpoint.
///
/// `expires_in` is the validity window in seconds counted from issuance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// Raw body shape covering both the success and the error payload.
#[derive(Debug, Default, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}

/// HTTP client bound to one token endpoint.
///
/// Cheap to clone; every holder in the pool gets its own copy sharing the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TokenClient {
    /// Wrap an existing reqwest client.
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    /// Build a client whose every request is bounded by `timeout`.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::new(http, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request a fresh access token for `credential`.
    ///
    /// Transport errors are stripped of the request URL before being
    /// returned, since the query string carries the app secret.
    pub async fn fetch(&self, credential: &Credential) -> Result<TokenResponse> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("grant_type", GRANT_TYPE),
                ("appid", credential.app_id.as_str()),
                ("secret", credential.app_secret.expose().as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("reading token response: {}", e.without_url())))?;

        debug!(
            app_id = %credential.app_id,
            status = status.as_u16(),
            bytes = body.len(),
            "token endpoint responded"
        );

        parse_token_response(status.as_u16(), &body)
    }
}

/// Decide success or failure from a token endpoint body.
///
/// `status` is only used to describe failures that carry no `errcode`.
pub fn parse_token_response(status: u16, body: &[u8]) -> Result<TokenResponse> {
    let raw: RawTokenResponse = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedResponse(format!("HTTP {status}: {e}")))?;

    let Some(access_token) = raw.access_token else {
        return Err(Error::Api {
            errcode: raw.errcode.unwrap_or_default(),
            errmsg: raw
                .errmsg
                .unwrap_or_else(|| format!("HTTP {status}: response has no access_token")),
        });
    };

    match raw.expires_in {
        Some(secs) if secs > 0 => Ok(TokenResponse {
            access_token,
            expires_in: secs as u64,
        }),
        Some(secs) => Err(Error::MalformedResponse(format!(
            "non-positive expires_in: {secs}"
        ))),
        None => Err(Error::MalformedResponse(
            "access_token without expires_in".into(),
        )),
    }
}
