//! Cached token record
//!
//! Plain data: the token, when it was issued and how long it is valid for.
//! Encoding to disk is the store's business, not the record's.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use wechat_auth::TokenResponse;

/// Upper bound for `expire_time` when converting to a `TimeDelta` (100 years).
const MAX_EXPIRE_SECS: i64 = 100 * 365 * 24 * 3600;

/// Last known token for one app.
///
/// A record whose `updated_at` is the zero value (Unix epoch) was never
/// fetched. Placeholders written by a pool snapshot look like that and must
/// be treated as expired when read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub app_id: String,
    #[serde(rename = "accessToken")]
    pub token: String,
    /// Validity window in seconds, counted from `updated_at`
    pub expire_time: u64,
    /// Issuance time
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Record for a token the endpoint just issued.
    pub fn issued(app_id: impl Into<String>, response: &TokenResponse, at: DateTime<Utc>) -> Self {
        Self {
            app_id: app_id.into(),
            token: response.access_token.clone(),
            expire_time: response.expires_in,
            updated_at: at,
        }
    }

    /// Never-fetched record standing in for a holder without a token.
    pub fn placeholder(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    pub fn is_never_fetched(&self) -> bool {
        self.updated_at.timestamp() == 0 && self.updated_at.timestamp_subsec_nanos() == 0
    }

    /// Remaining validity relative to `now`, rounded to whole seconds.
    ///
    /// Zero for a never-fetched record; negative once expired.
    pub fn expires_in_at(&self, now: DateTime<Utc>) -> TimeDelta {
        if self.is_never_fetched() {
            return TimeDelta::zero();
        }
        let secs = i64::try_from(self.expire_time)
            .unwrap_or(MAX_EXPIRE_SECS)
            .min(MAX_EXPIRE_SECS);
        round_to_secs(TimeDelta::seconds(secs) - (now - self.updated_at))
    }

    pub fn expires_in(&self) -> TimeDelta {
        self.expires_in_at(Utc::now())
    }
}

/// Round half away from zero to whole seconds.
fn round_to_secs(delta: TimeDelta) -> TimeDelta {
    let ms = delta.num_milliseconds();
    let secs = if ms >= 0 {
        (ms + 500) / 1000
    } else {
        (ms - 500) / 1000
    };
    TimeDelta::seconds(secs)
}
