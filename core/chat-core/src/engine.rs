//! ChatEngine - the entry point for chat clients.
//!
//! Owns the store handle and the guarded sync state, and exposes everything a
//! front end needs: registration, sending, history, presence, completion and
//! the background sync loop. All calls are blocking.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use chat_core::{config, ChatEngine};
//!
//! let mut engine = ChatEngine::new(config::load(None)?)?;
//! engine.register("alice")?;
//! engine.send_message("hello @everyone")?;
//! ```

use crate::completion::complete_mention;
use crate::compose::{parse_input_with, Draft};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::ledger::Ledger;
use crate::policy::is_visible;
use crate::presence::PresenceTracker;
use crate::state::SharedState;
use crate::store::{HttpStore, SharedStore, StoreExt};
use crate::sync::{SyncListener, SyncLoop};
use chat_protocol::{
    format_timestamp, validate_identity, Message, SHARED_ASSISTANT_KEY, USERS_KEY,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub struct ChatEngine {
    config: ChatConfig,
    store: SharedStore,
    ledger: Ledger,
    presence: PresenceTracker,
    state: Arc<SharedState>,
    identity: Option<String>,
}

impl ChatEngine {
    /// Connects to the REST store named in `config`.
    pub fn new(config: ChatConfig) -> Result<Self> {
        let store = HttpStore::new(
            &config.store.url,
            &config.store.token,
            config.store.request_timeout,
        )?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Builds an engine over any store. Tests pass a shared `MemoryStore`.
    pub fn with_store(store: SharedStore, config: ChatConfig) -> Self {
        let ledger = Ledger::new(Arc::clone(&store));
        let presence = PresenceTracker::new(Arc::clone(&store), config.sync.presence_ttl_secs);
        Self {
            config,
            store,
            ledger,
            presence,
            state: Arc::new(SharedState::new()),
            identity: None,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn require_identity(&self) -> Result<&str> {
        self.identity.as_deref().ok_or(ChatError::NoIdentity)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────────

    /// Validates and records the identity, then adds it to the user registry.
    ///
    /// The registry is then read back into the known-user cache; a failure
    /// there only leaves completion less complete.
    pub fn register(&mut self, candidate: &str) -> Result<String> {
        let identity =
            validate_identity(candidate).map_err(|err| ChatError::InvalidIdentity(err.message))?;

        self.store.sadd(USERS_KEY, &identity)?;
        self.state.remember_users([identity.as_str()]);
        self.identity = Some(identity.clone());
        info!(identity = %identity, "Registered");

        if let Err(err) = self.refresh_known_users() {
            warn!(error = %err, "Failed to load user registry");
        }
        Ok(identity)
    }

    /// Merges the remote user registry into the known-user cache.
    pub fn refresh_known_users(&self) -> Result<usize> {
        let members = self.store.smembers(USERS_KEY)?;
        let count = members.len();
        self.state.remember_users(members);
        debug!(count, "Known users refreshed");
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────────

    /// Parses a raw input line and appends the resulting message.
    pub fn send_message(&self, raw: &str) -> Result<Message> {
        self.send_draft(parse_input_with(raw, &self.state.known_identities())?)
    }

    /// Appends an already-parsed message. At most once: failures are returned
    /// to the caller and nothing is queued.
    pub fn send_draft(&self, draft: Draft) -> Result<Message> {
        let sender = self.require_identity()?;
        let timestamp = format_timestamp(&chrono::Local::now());
        let message = draft.into_message(sender, timestamp);

        let length = self.ledger.append(&message)?;
        debug!(length, silent = message.silent, "Message appended");
        Ok(message)
    }

    /// The newest `history_count` messages visible to us, oldest first.
    pub fn history(&self) -> Result<Vec<Message>> {
        let identity = self.require_identity()?;
        let mut messages: Vec<Message> = self
            .ledger
            .fetch_newest(self.config.ui.history_count)?
            .into_iter()
            .filter(|message| is_visible(message, identity))
            .collect();
        messages.reverse();
        Ok(messages)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Presence & Completion
    // ─────────────────────────────────────────────────────────────────────────────

    /// Peer count from the last successful sync cycle.
    pub fn current_active_count(&self) -> u64 {
        self.state.active_count()
    }

    /// Reads the peer count straight from the store and caches it.
    pub fn refresh_active_count(&self) -> Result<u64> {
        let count = self.presence.active_count()?;
        self.state.set_active_count(count);
        Ok(count)
    }

    pub fn known_identities(&self) -> BTreeSet<String> {
        self.state.known_identities()
    }

    pub fn complete(&self, line: &str) -> Vec<String> {
        complete_mention(line, &self.state.known_identities())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Shared Assistant Key
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn shared_assistant_key(&self) -> Result<Option<String>> {
        Ok(self.store.get(SHARED_ASSISTANT_KEY)?)
    }

    pub fn set_shared_assistant_key(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ChatError::ConfigInvalid(
                "assistant key must not be empty".to_string(),
            ));
        }
        self.store.set(SHARED_ASSISTANT_KEY, key)?;
        info!("Shared assistant key updated");
        Ok(())
    }

    /// Returns whether a key was present.
    pub fn clear_shared_assistant_key(&self) -> Result<bool> {
        let removed = self.store.del(SHARED_ASSISTANT_KEY)? > 0;
        info!(removed, "Shared assistant key cleared");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn cursor(&self) -> Option<u64> {
        self.state.cursor()
    }

    /// Reads the ledger length and uses it as the starting cursor, so that
    /// only messages arriving after startup are dispatched. If this fails the
    /// first successful sync cycle sets the baseline instead.
    pub fn initialize_cursor(&self) -> Result<u64> {
        if let Some(cursor) = self.state.cursor() {
            return Ok(cursor);
        }
        let length = self.ledger.length()?;
        self.state.establish_baseline(length);
        Ok(self.state.cursor().unwrap_or(length))
    }

    /// Builds a sync loop without starting it.
    pub fn sync_loop(&self, listener: Arc<dyn SyncListener>) -> Result<SyncLoop> {
        let identity = self.require_identity()?;
        Ok(SyncLoop::new(
            identity,
            self.ledger.clone(),
            self.presence.clone(),
            Arc::clone(&self.state),
            listener,
            self.config.sync.clone(),
        ))
    }

    /// Starts the sync loop on its own thread. It runs until `stop` is set or
    /// the returned handle is stopped or dropped.
    pub fn start_sync(
        &self,
        listener: Arc<dyn SyncListener>,
        stop: Arc<AtomicBool>,
    ) -> Result<SyncHandle> {
        let sync = self.sync_loop(listener)?;
        let thread = sync
            .spawn(Arc::clone(&stop))
            .map_err(|source| ChatError::Io {
                context: "Failed to spawn sync thread".to_string(),
                source,
            })?;
        Ok(SyncHandle {
            stop,
            thread: Some(thread),
        })
    }
}

pub struct SyncHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Sets the stop flag and waits for the current cycle to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Sync thread panicked");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, TOKEN_ENV, URL_ENV};
    use crate::store::MemoryStore;
    use chat_protocol::{Verb, EVERYONE};

    fn test_config() -> ChatConfig {
        ChatConfig::resolve(FileConfig::default(), |key| match key {
            URL_ENV => Some("https://example.upstash.io".to_string()),
            TOKEN_ENV => Some("token".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn engine(store: &Arc<MemoryStore>) -> ChatEngine {
        ChatEngine::with_store(store.clone(), test_config())
    }

    #[test]
    fn register_validates_and_records_identity() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(&store);

        assert!(matches!(
            engine.register("   "),
            Err(ChatError::InvalidIdentity(_))
        ));
        assert!(matches!(
            engine.register("a-name-that-is-far-too-long"),
            Err(ChatError::InvalidIdentity(_))
        ));
        assert_eq!(engine.identity(), None);

        assert_eq!(engine.register("  alice ").unwrap(), "alice");
        assert_eq!(engine.identity(), Some("alice"));
        let known = engine.known_identities();
        assert!(known.contains("alice"));
        assert!(known.contains(EVERYONE));
    }

    #[test]
    fn register_loads_existing_users_for_completion() {
        let store = Arc::new(MemoryStore::new());
        engine(&store).register("bella").unwrap();

        let mut engine = engine(&store);
        engine.register("bob").unwrap();
        assert_eq!(
            engine.complete("hi @b"),
            vec!["@bella".to_string(), "@bob".to_string()]
        );
    }

    #[test]
    fn sending_requires_identity() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        assert!(matches!(
            engine.send_message("hello"),
            Err(ChatError::NoIdentity)
        ));
    }

    #[test]
    fn send_failure_is_surfaced_and_not_queued() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(&store);
        engine.register("alice").unwrap();

        store.fail_next(Verb::Lpush, 1);
        let err = engine.send_message("lost").unwrap_err();
        assert!(err.is_transport());
        assert!(engine.history().unwrap().is_empty());
    }

    #[test]
    fn history_is_oldest_first_and_filtered() {
        let store = Arc::new(MemoryStore::new());
        let mut alice = engine(&store);
        alice.register("alice").unwrap();
        let mut carol = engine(&store);
        carol.register("carol").unwrap();

        alice.send_message("first").unwrap();
        alice.send_message("@bob secret /silent").unwrap();
        alice.send_message("last").unwrap();

        let bodies: Vec<String> = carol
            .history()
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["first".to_string(), "last".to_string()]);
        assert_eq!(alice.history().unwrap().len(), 3);
    }

    #[test]
    fn silent_message_reaches_identity_with_punctuation() {
        let store = Arc::new(MemoryStore::new());
        let mut bob = engine(&store);
        bob.register("bob").unwrap();
        let mut bob_x = engine(&store);
        bob_x.register("bob-x").unwrap();
        let mut alice = engine(&store);
        alice.register("alice").unwrap();

        let sent = alice.send_message("/silent @Bob-X meet at 5").unwrap();
        assert_eq!(sent.recipients, vec!["bob-x".to_string()]);

        assert_eq!(bob_x.history().unwrap().len(), 1);
        assert!(bob.history().unwrap().is_empty());
    }

    #[test]
    fn shared_assistant_key_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);

        assert_eq!(engine.shared_assistant_key().unwrap(), None);
        assert!(engine.set_shared_assistant_key("  ").is_err());
        engine.set_shared_assistant_key(" abc123 ").unwrap();
        assert_eq!(
            engine.shared_assistant_key().unwrap(),
            Some("abc123".to_string())
        );
        assert!(engine.clear_shared_assistant_key().unwrap());
        assert!(!engine.clear_shared_assistant_key().unwrap());
    }

    #[test]
    fn initialize_cursor_uses_current_length_once() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(&store);
        engine.register("alice").unwrap();
        engine.send_message("before").unwrap();

        assert_eq!(engine.initialize_cursor().unwrap(), 1);
        engine.send_message("after").unwrap();
        assert_eq!(engine.initialize_cursor().unwrap(), 1);
    }

    #[test]
    fn sync_needs_identity() {
        struct Silent;
        impl SyncListener for Silent {
            fn on_new_visible_message(&self, _: &Message) {}
            fn on_notification(&self, _: &crate::policy::Notification) {}
        }

        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let result = engine.start_sync(Arc::new(Silent), Arc::new(AtomicBool::new(false)));
        assert!(matches!(result, Err(ChatError::NoIdentity)));
    }
}
