//! Message ledger accessor.
//!
//! The ledger is a list with the newest entry at index 0. Reads always come
//! back newest-first; history display reverses a batch to show oldest-first.

use crate::error::{ChatError, StoreError};
use crate::store::{SharedStore, StoreExt};
use chat_protocol::{decode_message, Message, MESSAGES_KEY};

#[derive(Clone)]
pub struct Ledger {
    store: SharedStore,
}

impl Ledger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Pushes a message at the head. Returns the new ledger length.
    ///
    /// Not retried: a failed append is reported and the message is dropped.
    pub fn append(&self, message: &Message) -> Result<u64, ChatError> {
        let payload = message
            .encode()
            .map_err(|err| ChatError::InvalidMessage(err.to_string()))?;
        Ok(self.store.lpush(MESSAGES_KEY, &payload)?)
    }

    pub fn length(&self) -> Result<u64, StoreError> {
        self.store.llen(MESSAGES_KEY)
    }

    /// The `n` newest decodable entries, newest-first.
    pub fn fetch_newest(&self, n: u64) -> Result<Vec<Message>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.lrange(MESSAGES_KEY, 0, to_index(n) - 1)?;
        Ok(decode_batch(&raw))
    }

    /// Entries that arrived after `cursor`, given a length observed at `observed`.
    ///
    /// Equivalent to `fetch_newest(observed - cursor)` at the moment the length
    /// was read, but addressed from the tail so that appends landing between
    /// the length check and this read do not shift the window.
    pub fn fetch_delta(&self, cursor: u64, observed: u64) -> Result<Vec<Message>, StoreError> {
        if observed <= cursor {
            return Ok(Vec::new());
        }
        let start = -to_index(observed);
        let stop = -to_index(cursor) - 1;
        let raw = self.store.lrange(MESSAGES_KEY, start, stop)?;
        Ok(decode_batch(&raw))
    }
}

fn to_index(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Malformed entries are skipped without aborting the rest of the batch.
fn decode_batch(raw: &[String]) -> Vec<Message> {
    raw.iter()
        .filter_map(|entry| match decode_message(entry) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping undecodable ledger entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreClient};
    use chat_protocol::Command;
    use std::sync::Arc;

    fn ledger() -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Ledger::new(store))
    }

    fn say(ledger: &Ledger, sender: &str, body: &str) {
        ledger
            .append(&Message::public(sender, body, String::new()))
            .expect("append");
    }

    fn bodies(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn append_grows_length() {
        let (_, ledger) = ledger();
        assert_eq!(ledger.length().unwrap(), 0);
        say(&ledger, "alice", "one");
        say(&ledger, "bob", "two");
        assert_eq!(ledger.length().unwrap(), 2);
    }

    #[test]
    fn fetch_newest_is_newest_first_and_prefix_stable() {
        let (_, ledger) = ledger();
        for body in ["one", "two", "three", "four"] {
            say(&ledger, "alice", body);
        }

        let short = ledger.fetch_newest(2).unwrap();
        let long = ledger.fetch_newest(3).unwrap();
        assert_eq!(bodies(&short), vec!["four", "three"]);
        assert_eq!(&long[..2], &short[..]);
        assert!(ledger.fetch_newest(0).unwrap().is_empty());
    }

    #[test]
    fn fetch_delta_ignores_appends_after_length_check() {
        let (_, ledger) = ledger();
        say(&ledger, "alice", "old");
        let cursor = ledger.length().unwrap();
        say(&ledger, "alice", "new-1");
        say(&ledger, "alice", "new-2");
        let observed = ledger.length().unwrap();
        say(&ledger, "alice", "racing");

        let delta = ledger.fetch_delta(cursor, observed).unwrap();
        assert_eq!(bodies(&delta), vec!["new-2", "new-1"]);
        assert!(ledger.fetch_delta(observed, observed).unwrap().is_empty());
        assert!(ledger.fetch_delta(observed, cursor).unwrap().is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let (store, ledger) = ledger();
        say(&ledger, "alice", "before");
        store
            .execute(&Command::lpush(MESSAGES_KEY, "{not json"))
            .unwrap();
        say(&ledger, "bob", "after");

        let batch = ledger.fetch_newest(3).unwrap();
        assert_eq!(bodies(&batch), vec!["after", "before"]);
    }

    #[test]
    fn append_rejects_invalid_sender_without_touching_store() {
        let (_, ledger) = ledger();
        let err = ledger
            .append(&Message::public("", "hi", String::new()))
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidMessage(_)));
        assert_eq!(ledger.length().unwrap(), 0);
    }
}
