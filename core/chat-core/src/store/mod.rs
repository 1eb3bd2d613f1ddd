//! Store client capability.
//!
//! Everything above this module talks to the remote store through
//! [`StoreClient::execute`]. The transport behind it (HTTP REST, an in-memory
//! map for tests) is swappable without touching the sync logic.
//!
//! Clients never retry; retry policy belongs to the caller.

mod http;
mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use chat_protocol::Command;
use serde_json::Value;
use std::sync::Arc;

/// Forwards one opaque command to the remote store.
pub trait StoreClient: Send + Sync {
    fn execute(&self, command: &Command) -> Result<Value, StoreError>;
}

/// Store handle shared between the foreground loop and the sync loop.
pub type SharedStore = Arc<dyn StoreClient>;

impl<T: StoreClient + ?Sized> StoreClient for Arc<T> {
    fn execute(&self, command: &Command) -> Result<Value, StoreError> {
        (**self).execute(command)
    }
}

/// Typed wrappers over the primitive commands the engine uses.
pub trait StoreExt: StoreClient {
    fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let command = Command::lpush(key, value);
        as_count(&command, self.execute(&command)?)
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let command = Command::lrange(key, start, stop);
        as_strings(&command, self.execute(&command)?)
    }

    fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let command = Command::llen(key);
        as_count(&command, self.execute(&command)?)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let command = Command::sadd(key, member);
        as_count(&command, self.execute(&command)?)
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let command = Command::smembers(key);
        as_strings(&command, self.execute(&command)?)
    }

    fn zadd(&self, key: &str, score: i64, member: &str) -> Result<u64, StoreError> {
        let command = Command::zadd(key, score, member);
        as_count(&command, self.execute(&command)?)
    }

    fn zrem_below(&self, key: &str, cutoff: i64) -> Result<u64, StoreError> {
        let command = Command::zrem_below(key, cutoff);
        as_count(&command, self.execute(&command)?)
    }

    fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let command = Command::zcard(key);
        as_count(&command, self.execute(&command)?)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let command = Command::get(key);
        match self.execute(&command)? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value)),
            other => Err(StoreError::malformed(
                command.name(),
                format!("expected string or null, got {}", other),
            )),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let command = Command::set(key, value);
        self.execute(&command).map(|_| ())
    }

    fn del(&self, key: &str) -> Result<u64, StoreError> {
        let command = Command::del(key);
        as_count(&command, self.execute(&command)?)
    }
}

impl<T: StoreClient + ?Sized> StoreExt for T {}

/// Integer replies may arrive as JSON numbers or numeric strings depending on
/// the REST gateway.
fn as_count(command: &Command, value: Value) -> Result<u64, StoreError> {
    let parsed = match &value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        StoreError::malformed(
            command.name(),
            format!("expected non-negative integer, got {}", value),
        )
    })
}

fn as_strings(command: &Command, value: Value) -> Result<Vec<String>, StoreError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => Ok(text),
                other => Err(StoreError::malformed(
                    command.name(),
                    format!("expected string element, got {}", other),
                )),
            })
            .collect(),
        other => Err(StoreError::malformed(
            command.name(),
            format!("expected array, got {}", other),
        )),
    }
}
