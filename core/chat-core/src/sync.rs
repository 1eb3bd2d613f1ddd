//! Delta sync loop.
//!
//! One cycle runs:
//!
//! ```text
//! heartbeat (if due) -> cleanup (if due) -> peer count -> length check
//!     -> no change | fetch delta -> dispatch -> advance cursor
//! ```
//!
//! The cursor only moves after a fetched batch has been handed to the
//! listener, so a cycle that dies between fetch and dispatch refetches the
//! same entries next time. Any store failure abandons the rest of the cycle;
//! the loop then sleeps the failure backoff instead of the poll interval and
//! carries on. Nothing short of the stop flag ends the loop.

use crate::config::SyncSettings;
use crate::error::ChatError;
use crate::ledger::Ledger;
use crate::policy::{coalesce, is_visible, Notification};
use crate::presence::{Cadence, PresenceTracker};
use crate::state::SharedState;
use chat_protocol::Message;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const STOP_CHECK_SLICE: Duration = Duration::from_millis(100);

/// Receives the results of sync cycles. Called from the sync thread.
pub trait SyncListener: Send + Sync {
    /// Before the first message of a batch with at least one visible message.
    fn on_batch_start(&self, _visible: usize) {}

    /// Once per newly visible message, newest to oldest within a batch.
    fn on_new_visible_message(&self, message: &Message);

    /// At most once per cycle.
    fn on_notification(&self, notification: &Notification);

    /// After a fetched batch has been fully dispatched.
    fn on_batch_end(&self) {}

    /// When cycles start failing after a healthy stretch. Repeated failures
    /// are not reported again until a cycle succeeds.
    fn on_store_failure(&self, _error: &ChatError) {}

    /// When a cycle succeeds after a reported failure.
    fn on_recovered(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// First successful length check; cursor set without dispatching.
    Baseline { length: u64 },
    /// Ledger did not grow past the cursor.
    NoChange { length: u64 },
    Delivered {
        fetched: usize,
        visible: usize,
        notified: bool,
        cursor: u64,
    },
}

pub struct SyncLoop {
    identity: String,
    ledger: Ledger,
    presence: PresenceTracker,
    state: Arc<SharedState>,
    listener: Arc<dyn SyncListener>,
    settings: SyncSettings,
    heartbeat: Cadence,
    cleanup: Cadence,
    failing: bool,
}

impl SyncLoop {
    pub fn new(
        identity: impl Into<String>,
        ledger: Ledger,
        presence: PresenceTracker,
        state: Arc<SharedState>,
        listener: Arc<dyn SyncListener>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            identity: identity.into(),
            ledger,
            presence,
            state,
            listener,
            heartbeat: Cadence::new(settings.heartbeat_interval_secs),
            cleanup: Cadence::new(settings.cleanup_interval_secs),
            settings,
            failing: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Runs one cycle at unix time `now`. Errors leave the cursor untouched.
    pub fn run_cycle(&mut self, now: i64) -> Result<CycleOutcome, ChatError> {
        if self.heartbeat.is_due(now) {
            self.presence.heartbeat(&self.identity, now)?;
            self.heartbeat.mark(now);
        }
        if self.cleanup.is_due(now) {
            self.presence.cleanup(now)?;
            self.cleanup.mark(now);
        }

        let active = self.presence.active_count()?;
        self.state.set_active_count(active);

        let length = self.ledger.length()?;
        let Some(cursor) = self.state.cursor() else {
            self.state.establish_baseline(length);
            debug!(length, "Sync cursor baseline established");
            return Ok(CycleOutcome::Baseline { length });
        };
        if length <= cursor {
            return Ok(CycleOutcome::NoChange { length });
        }

        let batch = self.ledger.fetch_delta(cursor, length)?;
        self.state
            .remember_users(batch.iter().map(|message| message.sender.as_str()));

        let visible: Vec<&Message> = batch
            .iter()
            .filter(|m| is_visible(m, &self.identity))
            .collect();
        if !visible.is_empty() {
            self.listener.on_batch_start(visible.len());
        }
        for message in &visible {
            self.listener.on_new_visible_message(message);
        }

        let notification = coalesce(&batch, &self.identity);
        if let Some(notification) = &notification {
            self.listener.on_notification(notification);
        }
        self.listener.on_batch_end();

        let cursor = self.state.advance_cursor(length);
        debug!(
            fetched = batch.len(),
            visible = visible.len(),
            cursor,
            "Delta dispatched"
        );
        Ok(CycleOutcome::Delivered {
            fetched: batch.len(),
            visible: visible.len(),
            notified: notification.is_some(),
            cursor,
        })
    }

    /// Runs one cycle, absorbing any failure. Returns how long to sleep.
    pub fn step(&mut self, now: i64) -> Duration {
        match self.run_cycle(now) {
            Ok(outcome) => {
                trace!(?outcome, "Sync cycle complete");
                if self.failing {
                    self.failing = false;
                    info!("Store connection recovered");
                    self.listener.on_recovered();
                }
                self.settings.poll_interval
            }
            Err(err) => {
                if self.failing {
                    debug!(error = %err, "Sync cycle failed again");
                } else {
                    self.failing = true;
                    warn!(error = %err, "Sync cycle failed");
                    self.listener.on_store_failure(&err);
                }
                self.settings.failure_backoff
            }
        }
    }

    /// Cycles until `stop` is set.
    pub fn run(mut self, stop: Arc<AtomicBool>) {
        info!(identity = %self.identity, "Sync loop started");
        while !stop.load(Ordering::SeqCst) {
            let pause = self.step(chrono::Utc::now().timestamp());
            sleep_unless_stopped(pause, &stop);
        }
        info!("Sync loop stopped");
    }

    pub fn spawn(self, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("chat-sync".to_string())
            .spawn(move || self.run(stop))
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(STOP_CHECK_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SharedStore, StoreClient};
    use chat_protocol::{Command, Verb, MESSAGES_KEY};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<Message>>,
        notifications: Mutex<Vec<Notification>>,
        failures: Mutex<usize>,
        recoveries: Mutex<usize>,
    }

    impl SyncListener for Recorder {
        fn on_new_visible_message(&self, message: &Message) {
            self.messages.lock().unwrap().push(message.clone());
        }

        fn on_notification(&self, notification: &Notification) {
            self.notifications.lock().unwrap().push(notification.clone());
        }

        fn on_store_failure(&self, _error: &ChatError) {
            *self.failures.lock().unwrap() += 1;
        }

        fn on_recovered(&self) {
            *self.recoveries.lock().unwrap() += 1;
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(10),
            failure_backoff: Duration::from_millis(20),
            ..SyncSettings::default()
        }
    }

    fn sync_for(
        identity: &str,
        store: &Arc<MemoryStore>,
    ) -> (SyncLoop, Arc<SharedState>, Arc<Recorder>) {
        let shared: SharedStore = store.clone();
        let state = Arc::new(SharedState::new());
        let recorder = Arc::new(Recorder::default());
        let sync = SyncLoop::new(
            identity,
            Ledger::new(shared.clone()),
            PresenceTracker::new(shared, 15),
            Arc::clone(&state),
            recorder.clone(),
            settings(),
        );
        (sync, state, recorder)
    }

    fn post(store: &MemoryStore, sender: &str, body: &str) {
        let payload = Message::public(sender, body, "2026-01-07 10:00:00".to_string())
            .encode()
            .unwrap();
        store
            .execute(&Command::lpush(MESSAGES_KEY, &payload))
            .unwrap();
    }

    #[test]
    fn first_cycle_sets_baseline_without_dispatch() {
        let store = Arc::new(MemoryStore::new());
        post(&store, "alice", "old news");
        let (mut sync, state, recorder) = sync_for("bob", &store);

        assert_eq!(
            sync.run_cycle(100).unwrap(),
            CycleOutcome::Baseline { length: 1 }
        );
        assert_eq!(state.cursor(), Some(1));
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn delta_is_dispatched_newest_first_then_cursor_advances() {
        let store = Arc::new(MemoryStore::new());
        let (mut sync, state, recorder) = sync_for("bob", &store);
        sync.run_cycle(100).unwrap();

        post(&store, "alice", "one");
        post(&store, "carol", "two");

        let outcome = sync.run_cycle(101).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Delivered {
                fetched: 2,
                visible: 2,
                notified: true,
                cursor: 2
            }
        );
        let bodies: Vec<String> = recorder
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body.clone())
            .collect();
        assert_eq!(bodies, vec!["two".to_string(), "one".to_string()]);
        assert_eq!(recorder.notifications.lock().unwrap().len(), 1);
        assert_eq!(state.cursor(), Some(2));
        assert!(state.known_identities().contains("carol"));

        assert_eq!(
            sync.run_cycle(102).unwrap(),
            CycleOutcome::NoChange { length: 2 }
        );
    }

    #[test]
    fn own_messages_are_shown_but_not_notified() {
        let store = Arc::new(MemoryStore::new());
        let (mut sync, _, recorder) = sync_for("bob", &store);
        sync.run_cycle(100).unwrap();

        post(&store, "bob", "talking to myself");
        sync.run_cycle(101).unwrap();

        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
        assert!(recorder.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_length_check_keeps_cursor_and_backs_off() {
        let store = Arc::new(MemoryStore::new());
        let (mut sync, state, recorder) = sync_for("bob", &store);
        sync.run_cycle(100).unwrap();
        post(&store, "alice", "queued");

        store.fail_next(Verb::Llen, 1);
        assert_eq!(sync.step(101), Duration::from_millis(20));
        assert_eq!(state.cursor(), Some(0));
        assert!(recorder.messages.lock().unwrap().is_empty());

        assert_eq!(sync.step(102), Duration::from_millis(10));
        assert_eq!(state.cursor(), Some(1));
        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_fetch_refetches_same_window_next_cycle() {
        let store = Arc::new(MemoryStore::new());
        let (mut sync, state, recorder) = sync_for("bob", &store);
        sync.run_cycle(100).unwrap();
        post(&store, "alice", "first");

        store.fail_next(Verb::Lrange, 1);
        assert!(sync.run_cycle(101).is_err());
        assert_eq!(state.cursor(), Some(0));

        post(&store, "alice", "second");
        sync.run_cycle(102).unwrap();
        assert_eq!(recorder.messages.lock().unwrap().len(), 2);
        assert_eq!(state.cursor(), Some(2));
    }

    #[test]
    fn failures_are_reported_once_until_recovery() {
        let store = Arc::new(MemoryStore::new());
        let (mut sync, _, recorder) = sync_for("bob", &store);

        store.fail_next(Verb::Zadd, 3);
        sync.step(100);
        sync.step(101);
        sync.step(102);
        assert_eq!(*recorder.failures.lock().unwrap(), 1);
        assert_eq!(*recorder.recoveries.lock().unwrap(), 0);

        sync.step(103);
        assert_eq!(*recorder.recoveries.lock().unwrap(), 1);
    }

    #[test]
    fn baseline_is_deferred_until_length_is_readable() {
        let store = Arc::new(MemoryStore::new());
        post(&store, "alice", "before we joined");
        let (mut sync, state, recorder) = sync_for("bob", &store);

        store.fail_next(Verb::Llen, 1);
        assert!(sync.run_cycle(100).is_err());
        assert_eq!(state.cursor(), None);

        assert_eq!(
            sync.run_cycle(101).unwrap(),
            CycleOutcome::Baseline { length: 1 }
        );
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn heartbeat_follows_cadence_and_updates_peer_count() {
        let store = Arc::new(MemoryStore::new());
        let (mut sync, state, _) = sync_for("bob", &store);

        sync.run_cycle(100).unwrap();
        sync.run_cycle(102).unwrap();
        assert_eq!(store.calls(Verb::Zadd), 1);
        assert_eq!(state.active_count(), 1);

        sync.run_cycle(105).unwrap();
        assert_eq!(store.calls(Verb::Zadd), 2);
    }

    #[test]
    fn run_exits_when_stop_is_set() {
        let store = Arc::new(MemoryStore::new());
        let (sync, state, _) = sync_for("bob", &store);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = sync.spawn(Arc::clone(&stop)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while state.cursor().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(state.cursor(), Some(0));
    }
}
