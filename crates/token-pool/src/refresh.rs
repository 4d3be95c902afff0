//! Per-holder background refresh loop
//!
//! Each registered credential gets one of these on its own task. The loop
//! refreshes once immediately (a token loaded from disk may already be
//! stale), then re-checks on every interval tick. It waits only on the
//! ticker or the stop signal and never exits on a fetch error: the next tick
//! is the retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::holder::{MAX_CHECK_INTERVAL, TokenHolder};

/// Floor for the check interval; `tokio::time::interval` panics on zero.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Run the refresh loop for `holder` until `stop` fires.
///
/// A dropped sender counts as a stop request too.
pub(crate) async fn run_refresh_loop(holder: Arc<TokenHolder>, mut stop: oneshot::Receiver<()>) {
    // `Instant + period` panics past the clock's range
    let period = holder
        .settings()
        .interval
        .clamp(MIN_INTERVAL, MAX_CHECK_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // A slow fetch must not be followed by a burst of catch-up ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    refresh_once(&holder).await;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                info!(app_id = holder.app_id(), "quit token refresh loop");
                return;
            }
            _ = ticker.tick() => refresh_once(&holder).await,
        }
    }
}

/// One threshold check, refreshing if needed. Errors are already logged by
/// the holder; they only end this attempt.
async fn refresh_once(holder: &TokenHolder) {
    match holder.update().await {
        Ok(true) => {}
        Ok(false) => {
            metrics::gauge!("token_expires_in_seconds", "app_id" => holder.app_id().to_string())
                .set(holder.expires_in().await.num_seconds() as f64);
        }
        Err(e) => {
            debug!(app_id = holder.app_id(), error = %e, "refresh attempt failed, will retry next tick");
        }
    }
}
