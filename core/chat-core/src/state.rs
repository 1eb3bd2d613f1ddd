//! Process-local state shared by the foreground loop and the sync loop.
//!
//! Every field sits behind one mutex. Each accessor takes the lock for a
//! single read or update and releases it before returning; store calls are
//! never made while it is held.

use chat_protocol::EVERYONE;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SyncState {
    /// Ledger entries already processed. `None` until a baseline length has
    /// been observed.
    cursor: Option<u64>,
    active_count: u64,
    known_users: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<SyncState>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, SyncState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cursor(&self) -> Option<u64> {
        self.guard().cursor
    }

    /// Sets the starting cursor if none exists yet. Returns whether it was set.
    pub fn establish_baseline(&self, length: u64) -> bool {
        let mut state = self.guard();
        if state.cursor.is_some() {
            return false;
        }
        state.cursor = Some(length);
        true
    }

    /// Moves the cursor forward to `length`; never moves it back.
    pub fn advance_cursor(&self, length: u64) -> u64 {
        let mut state = self.guard();
        let next = state.cursor.map_or(length, |current| current.max(length));
        state.cursor = Some(next);
        next
    }

    pub fn active_count(&self) -> u64 {
        self.guard().active_count
    }

    pub fn set_active_count(&self, count: u64) {
        self.guard().active_count = count;
    }

    pub fn remember_users<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.guard();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() {
                state.known_users.insert(name.to_string());
            }
        }
    }

    /// Cached identities plus the reserved `everyone`.
    pub fn known_identities(&self) -> BTreeSet<String> {
        let mut identities = self.guard().known_users.clone();
        identities.insert(EVERYONE.to_string());
        identities
    }
}
