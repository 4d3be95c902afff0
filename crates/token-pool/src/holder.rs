//! Per-credential token holder
//!
//! A holder owns one credential, its current `TokenRecord` and the refresh
//! loop that keeps it fresh. Two locks split the work:
//!
//! - `refresh_lock` serializes refresh checks, so at most one fetch per app
//!   is ever in flight.
//! - `record` guards the token itself. It is only write-locked for the swap
//!   after a successful fetch, so lookups never wait on the network and never
//!   see a half-written record.
//!
//! Loop lifecycle is one-way: `Idle → Running → Stopped` (or `Idle →
//! Stopped`). A stopped holder cannot be restarted; register a new one.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wechat_auth::{Credential, TokenClient};

use crate::error::{Error, Result};
use crate::record::TokenRecord;
use crate::refresh;

/// Default interval between refresh checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Longest interval between refresh checks; longer settings are clamped.
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default remaining validity below which a token is re-fetched.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(180);

/// Refresh schedule for one holder.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    /// How often the loop re-checks the remaining validity
    pub interval: Duration,
    /// Refresh once the remaining validity drops below this
    pub threshold: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHECK_INTERVAL,
            threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }
}

/// Token and remaining validity handed to lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLookup {
    pub token: String,
    pub expires_in_secs: i64,
}

/// Refresh loop state.
enum LoopState {
    Idle,
    Running {
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Stopped,
}

impl LoopState {
    fn label(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Running { .. } => "running",
            LoopState::Stopped => "stopped",
        }
    }
}

/// Owner of one credential's token and refresh loop.
pub struct TokenHolder {
    credential: Credential,
    client: TokenClient,
    settings: RefreshSettings,
    record: RwLock<Option<TokenRecord>>,
    refresh_lock: Mutex<()>,
    state: std::sync::Mutex<LoopState>,
}

impl TokenHolder {
    pub fn new(credential: Credential, client: TokenClient, settings: RefreshSettings) -> Self {
        Self {
            credential,
            client,
            settings,
            record: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            state: std::sync::Mutex::new(LoopState::Idle),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.credential.app_id
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    /// Remaining validity of the current token, zero if never fetched.
    pub async fn expires_in(&self) -> TimeDelta {
        self.record
            .read()
            .await
            .as_ref()
            .map(TokenRecord::expires_in)
            .unwrap_or_else(TimeDelta::zero)
    }

    /// Clone of the current record, if any.
    pub async fn snapshot(&self) -> Option<TokenRecord> {
        self.record.read().await.clone()
    }

    /// Current token for the serving path.
    ///
    /// Fails with `NotFetched` when there is no token or it has already
    /// expired; an expired token is of no use to a caller.
    pub async fn token(&self) -> Result<TokenLookup> {
        let record = self.record.read().await;
        match record.as_ref() {
            Some(r) if !r.is_never_fetched() && !r.token.is_empty() => {
                let expires_in_secs = r.expires_in().num_seconds();
                if expires_in_secs <= 0 {
                    return Err(Error::NotFetched(self.credential.app_id.clone()));
                }
                Ok(TokenLookup {
                    token: r.token.clone(),
                    expires_in_secs,
                })
            }
            _ => Err(Error::NotFetched(self.credential.app_id.clone())),
        }
    }

    /// Install a record loaded from the store.
    ///
    /// Ignored when it belongs to another app, was never fetched, or is not
    /// newer than what the holder already has.
    pub async fn seed(&self, record: TokenRecord) {
        if record.app_id != self.credential.app_id {
            warn!(
                app_id = %self.credential.app_id,
                record_app_id = %record.app_id,
                "ignoring persisted token for a different app"
            );
            return;
        }
        if record.is_never_fetched() {
            debug!(app_id = %self.credential.app_id, "persisted token was never fetched, ignoring");
            return;
        }

        let mut current = self.record.write().await;
        if current
            .as_ref()
            .is_some_and(|c| c.updated_at >= record.updated_at)
        {
            return;
        }
        info!(
            app_id = %self.credential.app_id,
            expires_in_secs = record.expires_in().num_seconds(),
            "seeded token from store"
        );
        *current = Some(record);
    }

    /// Whether the current token must be re-fetched.
    pub async fn needs_refresh(&self) -> bool {
        let record = self.record.read().await;
        match record.as_ref() {
            None => true,
            Some(r) if r.is_never_fetched() => true,
            Some(r) => r.expires_in() < threshold_delta(self.settings.threshold),
        }
    }

    /// Refresh the token if it is missing or about to expire.
    ///
    /// Returns `Ok(true)` when a new token was installed, `Ok(false)` when the
    /// current one is still fresh or newer than the fetched one. Fetch failures leave the existing record in
    /// place. Nothing is written to disk here.
    pub async fn update(&self) -> Result<bool> {
        let _guard = self.refresh_lock.lock().await;

        if !self.needs_refresh().await {
            debug!(app_id = %self.credential.app_id, "token still fresh, no need to update");
            return Ok(false);
        }

        self.fetch_and_swap().await
    }

    /// Fetch a token and install it unless the current record is newer.
    /// Caller holds `refresh_lock`.
    async fn fetch_and_swap(&self) -> Result<bool> {
        let app_id = self.credential.app_id.as_str();

        let response = match self.client.fetch(&self.credential).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    wechat_auth::Error::Api { errcode, errmsg } => {
                        warn!(app_id, errcode, errmsg = %errmsg, "token API rejected refresh, keeping current token");
                    }
                    wechat_auth::Error::Http(msg) => {
                        warn!(app_id, error = %msg, "token request failed, keeping current token");
                    }
                    wechat_auth::Error::MalformedResponse(msg) => {
                        warn!(app_id, error = %msg, "token response unusable, keeping current token");
                    }
                }
                metrics::counter!("token_refresh_total", "app_id" => app_id.to_string(), "outcome" => e.kind())
                    .increment(1);
                return Err(e.into());
            }
        };

        let fresh = TokenRecord::issued(app_id, &response, Utc::now());
        let expires_in_secs = fresh.expires_in().num_seconds();

        {
            let mut current = self.record.write().await;
            if current
                .as_ref()
                .is_some_and(|c| c.updated_at >= fresh.updated_at)
            {
                debug!(app_id, "fetched token is not newer than current, discarding");
                return Ok(false);
            }
            *current = Some(fresh);
        }

        metrics::counter!("token_refresh_total", "app_id" => app_id.to_string(), "outcome" => "success")
            .increment(1);
        metrics::gauge!("token_expires_in_seconds", "app_id" => app_id.to_string())
            .set(expires_in_secs as f64);
        info!(app_id, expires_in_secs, "access token refreshed");

        if response.expires_in <= self.settings.threshold.as_secs() {
            warn!(
                app_id,
                expires_in_secs,
                threshold_secs = self.settings.threshold.as_secs(),
                "issued token validity is shorter than the refresh threshold, every check will refetch"
            );
        }
        Ok(true)
    }

    /// Start the refresh loop on its own task.
    ///
    /// Returns `false` if the loop was already started or the holder closed.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, LoopState::Idle) {
            warn!(app_id = %self.credential.app_id, state = state.label(), "refresh loop not started");
            return false;
        }

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(refresh::run_refresh_loop(Arc::clone(self), stop_rx));
        *state = LoopState::Running { stop, task };
        debug!(app_id = %self.credential.app_id, "refresh loop started");
        true
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            LoopState::Running { .. }
        )
    }

    /// Stop the refresh loop and wait for it to exit.
    ///
    /// The stop signal is sent at most once; later calls are no-ops. A
    /// holder that was never started simply becomes `Stopped`.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, LoopState::Stopped)
        };

        if let LoopState::Running { stop, task } = previous {
            // The loop may already be gone if it panicked; nothing to signal then
            let _ = stop.send(());
            if let Err(e) = task.await {
                warn!(app_id = %self.credential.app_id, error = %e, "refresh loop ended abnormally");
            }
        }
    }
}

fn threshold_delta(threshold: Duration) -> TimeDelta {
    TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX)
}
