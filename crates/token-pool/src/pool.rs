//! Registry of token holders keyed by app id
//!
//! The pool is built once at startup and shared by reference (`Arc`) with
//! the HTTP layer and the shutdown path. It seeds every new holder from the
//! disk store, and on shutdown writes one snapshot of every token back before
//! stopping the refresh loops, so the file reflects the last in-memory state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::TimeDelta;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::holder::{TokenHolder, TokenLookup};
use crate::record::TokenRecord;
use crate::store::DiskStore;

/// Token pool backed by a disk store.
pub struct TokenPool {
    holders: RwLock<HashMap<String, Arc<TokenHolder>>>,
    store: Arc<DiskStore>,
}

impl TokenPool {
    pub fn new(store: Arc<DiskStore>) -> Self {
        info!(path = %store.path().display(), "token pool initialized");
        Self {
            holders: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Register a holder, seeded with its persisted token if there is one.
    ///
    /// A store failure only costs the cached token: the holder starts empty
    /// and fetches on its first tick. Re-registering an app id replaces the
    /// old holder and stops its loop.
    pub async fn put(&self, holder: TokenHolder) -> Result<Arc<TokenHolder>> {
        let app_id = holder.app_id().to_string();
        if app_id.is_empty() {
            return Err(Error::EmptyAppId);
        }

        match self.store.load(&app_id).await {
            Ok(record) => holder.seed(record).await,
            Err(Error::NotFound(_)) => {
                debug!(app_id, "no persisted token, holder starts empty");
            }
            Err(e) => {
                warn!(app_id, error = %e, "loading token from store failed, holder starts empty");
            }
        }

        let holder = Arc::new(holder);
        let replaced = self
            .holders
            .write()
            .await
            .insert(app_id.clone(), Arc::clone(&holder));

        if let Some(old) = replaced {
            warn!(app_id, "app id registered twice, stopping the previous holder");
            old.close().await;
        }
        info!(app_id, "token holder registered");
        Ok(holder)
    }

    /// Look up a registered holder.
    pub async fn get(&self, app_id: &str) -> Result<Arc<TokenHolder>> {
        self.holders
            .read()
            .await
            .get(app_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("access token holder not found for {app_id}")))
    }

    /// Current token and remaining validity for `app_id`.
    pub async fn token(&self, app_id: &str) -> Result<TokenLookup> {
        self.get(app_id).await?.token().await
    }

    /// Start the refresh loop of every registered holder.
    pub async fn start_all(&self) {
        let holders = self.holders().await;
        let started = holders.iter().filter(|h| h.start()).count();
        info!(started, total = holders.len(), "refresh loops started");
    }

    /// Registered app ids, in no particular order.
    pub async fn app_ids(&self) -> Vec<String> {
        self.holders.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.holders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        &self.store
    }

    /// Write every holder's current record to the store in one batch.
    ///
    /// Each record is copied under its holder's lock. Holders without a token
    /// contribute a never-fetched placeholder.
    pub async fn save_all(&self) -> Result<()> {
        let holders = self.holders().await;
        let mut records = Vec::with_capacity(holders.len());
        for holder in &holders {
            let record = holder
                .snapshot()
                .await
                .unwrap_or_else(|| TokenRecord::placeholder(holder.app_id()));
            records.push(record);
        }

        self.store.save(&records).await?;
        info!(saved = records.len(), "token snapshot persisted");
        Ok(())
    }

    /// Persist all tokens, then stop every refresh loop and wait for them.
    ///
    /// A failed save is logged and returned, but only after the loops are
    /// down so shutdown always completes.
    pub async fn close(&self) -> Result<()> {
        let saved = self.save_all().await;
        if let Err(e) = &saved {
            warn!(error = %e, "saving tokens on shutdown failed");
        }

        let mut closing = JoinSet::new();
        for holder in self.holders().await {
            closing.spawn(async move { holder.close().await });
        }
        while let Some(result) = closing.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "closing token holder failed");
            }
        }

        info!("token pool closed");
        saved
    }

    /// Pool health summary for the health endpoint.
    ///
    /// Per-holder status: `fresh` (above the refresh threshold), `expiring`
    /// (valid but due for refresh), `expired`, or `empty` (never fetched).
    /// Pool status: all holders serving → healthy, some → degraded, none →
    /// unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let mut holders = self.holders().await;
        holders.sort_by(|a, b| a.app_id().cmp(b.app_id()));

        let mut apps = Vec::with_capacity(holders.len());
        let (mut fresh, mut expiring, mut expired, mut empty) = (0usize, 0usize, 0usize, 0usize);

        for holder in &holders {
            let record = holder.snapshot().await;
            let threshold = TimeDelta::from_std(holder.settings().threshold).unwrap_or(TimeDelta::MAX);
            let (status, expires_in) = match record {
                Some(r) if !r.is_never_fetched() => {
                    let expires_in = r.expires_in();
                    let status = if expires_in >= threshold {
                        fresh += 1;
                        "fresh"
                    } else if expires_in > TimeDelta::zero() {
                        expiring += 1;
                        "expiring"
                    } else {
                        expired += 1;
                        "expired"
                    };
                    (status, expires_in.num_seconds())
                }
                _ => {
                    empty += 1;
                    ("empty", 0)
                }
            };
            apps.push(serde_json::json!({
                "app_id": holder.app_id(),
                "status": status,
                "expires_in_secs": expires_in,
                "refreshing": holder.is_running(),
            }));
        }

        let total = holders.len();
        let serving = fresh + expiring;
        let pool_status = if serving == total && total > 0 {
            "healthy"
        } else if serving > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "apps_total": total,
            "apps_fresh": fresh,
            "apps_expiring": expiring,
            "apps_expired": expired,
            "apps_empty": empty,
            "apps": apps,
        })
    }

    async fn holders(&self) -> Vec<Arc<TokenHolder>> {
        self.holders.read().await.values().cloned().collect()
    }
}
