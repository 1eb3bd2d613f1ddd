//! Presence tracking over a shared sorted set.
//!
//! Each participant upserts `identity -> last heartbeat (unix seconds)` and
//! anyone may trim entries older than the TTL. Both operations are idempotent
//! and commute across clients, so no coordination is needed.
//!
//! The resulting count is advisory: it lags reality by at most
//! `cleanup interval + ttl` and is only ever displayed.

use crate::error::StoreError;
use crate::store::{SharedStore, StoreExt};
use chat_protocol::PRESENCE_KEY;

pub const DEFAULT_PRESENCE_TTL_SECS: i64 = 15;

#[derive(Clone)]
pub struct PresenceTracker {
    store: SharedStore,
    ttl_secs: i64,
}

impl PresenceTracker {
    pub fn new(store: SharedStore, ttl_secs: i64) -> Self {
        Self { store, ttl_secs }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Entries scored strictly below this are stale at `now`.
    pub fn cutoff(&self, now: i64) -> i64 {
        now - self.ttl_secs
    }

    pub fn heartbeat(&self, identity: &str, now: i64) -> Result<(), StoreError> {
        self.store.zadd(PRESENCE_KEY, now, identity)?;
        tracing::trace!(identity, now, "Presence heartbeat written");
        Ok(())
    }

    /// Removes stale peers, returning how many entries this call removed.
    pub fn cleanup(&self, now: i64) -> Result<u64, StoreError> {
        let removed = self.store.zrem_below(PRESENCE_KEY, self.cutoff(now))?;
        if removed > 0 {
            tracing::debug!(removed, cutoff = self.cutoff(now), "Expired stale peers");
        }
        Ok(removed)
    }

    pub fn active_count(&self) -> Result<u64, StoreError> {
        self.store.zcard(PRESENCE_KEY)
    }
}

/// Decides when a periodic task is due, given unix-second timestamps.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval_secs: i64,
    last_run: Option<i64>,
}

impl Cadence {
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval_secs,
            last_run: None,
        }
    }

    /// A clock that stepped backwards past the last run also counts as due.
    pub fn is_due(&self, now: i64) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now < last || now - last >= self.interval_secs,
        }
    }

    /// Records a successful run. Failed runs are not recorded, so they are
    /// retried on the next cycle.
    pub fn mark(&mut self, now: i64) {
        self.last_run = Some(now);
    }
}
