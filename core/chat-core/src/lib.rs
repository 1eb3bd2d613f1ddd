//! # chat-core
//!
//! Client-side synchronization engine for a terminal group chat whose only
//! shared state lives in a remote Redis-compatible store reached over REST.
//!
//! ## Design Principles
//!
//! - **Synchronous**: blocking store calls, one background sync thread.
//! - **Store is the source of truth**: nothing durable is kept locally.
//! - **Failures are cycles, not crashes**: a failed store call abandons one
//!   sync cycle and nothing more.
//! - **Presentation stays out**: rendering and notification delivery belong
//!   to the front end through [`SyncListener`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chat_core::{config, ChatEngine};
//! use std::sync::{atomic::AtomicBool, Arc};
//!
//! let mut engine = ChatEngine::new(config::load(None)?)?;
//! engine.register("alice")?;
//! engine.initialize_cursor().ok();
//! let sync = engine.start_sync(listener, Arc::new(AtomicBool::new(false)))?;
//! ```

pub mod completion;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod patterns;
pub mod policy;
pub mod presence;
pub mod state;
pub mod store;
pub mod sync;

pub use compose::{parse_input, parse_input_with, Draft};
pub use config::ChatConfig;
pub use engine::{ChatEngine, SyncHandle};
pub use error::{ChatError, Result, StoreError};
pub use policy::{decorate, is_visible, Notification, Rendered, Segment, Severity};
pub use store::{HttpStore, MemoryStore, SharedStore, StoreClient, StoreExt};
pub use sync::{CycleOutcome, SyncListener, SyncLoop};

pub use chat_protocol::Message;
