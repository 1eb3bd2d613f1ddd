//! Visibility and notification policy.
//!
//! Pure functions over already-decoded messages. Nothing here touches the
//! store or shared state.
//!
//! ## Notification coalescing
//!
//! One delta batch yields at most one notification:
//!
//! ```text
//! relevant = visible to me AND not sent by me
//! severity = max over ALL relevant messages (@everyone > @me > plain)
//! body     = newest relevant message (batch is newest-first)
//! ```
//!
//! Title and body may therefore describe different messages when the
//! mention is not in the newest one.

use crate::patterns::{mention_at, mentions, word_mention_at};
use chat_protocol::{Message, EVERYONE};

pub const SILENT_MARKER: &str = "[SILENT]";

/// True unless the message is silent and `self_identity` is neither its
/// sender nor one of its recipients.
pub fn is_visible(message: &Message, self_identity: &str) -> bool {
    !message.silent
        || message.sender == self_identity
        || message.recipients.iter().any(|r| r == self_identity)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decoration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Mention { text: String, addresses_self: bool },
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Segment::Text(text) => text,
            Segment::Mention { text, .. } => text,
        }
    }
}

/// Presentation form of a message. Built at render time, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub timestamp: String,
    pub sender: String,
    pub silent: bool,
    pub segments: Vec<Segment>,
}

impl Rendered {
    pub fn marker(&self) -> Option<&'static str> {
        self.silent.then_some(SILENT_MARKER)
    }

    /// Body text with decoration stripped; always equals the source body.
    pub fn plain_text(&self) -> String {
        self.segments.iter().map(Segment::text).collect()
    }
}

pub fn decorate(message: &Message, self_identity: &str) -> Rendered {
    let body = message.body.as_str();
    let mut segments = Vec::new();
    let mut last = 0;

    for (at, _) in body.match_indices('@') {
        if at < last {
            continue;
        }
        let own = mention_at(body, at, self_identity)
            .into_iter()
            .chain(mention_at(body, at, EVERYONE))
            .max();
        let (end, addresses_self) = match own {
            Some(end) => (end, true),
            None => match word_mention_at(body, at) {
                Some(end) => (end, false),
                None => continue,
            },
        };
        if at > last {
            segments.push(Segment::Text(body[last..at].to_string()));
        }
        segments.push(Segment::Mention {
            text: body[at..end].to_string(),
            addresses_self,
        });
        last = end;
    }
    if last < body.len() {
        segments.push(Segment::Text(body[last..].to_string()));
    }

    Rendered {
        timestamp: message.timestamp.clone(),
        sender: message.sender.clone(),
        silent: message.silent,
        segments,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Plain,
    SelfMention,
    Everyone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub sender: String,
    pub text: String,
}

impl Notification {
    pub fn body(&self) -> String {
        format!("{}: {}", self.sender, self.text)
    }
}

pub fn classify(text: &str, self_identity: &str) -> Severity {
    if mentions(text, EVERYONE) {
        Severity::Everyone
    } else if mentions(text, self_identity) {
        Severity::SelfMention
    } else {
        Severity::Plain
    }
}

/// Messages in a newest-first batch that justify alerting `self_identity`.
pub fn relevant<'a>(batch: &'a [Message], self_identity: &str) -> Vec<&'a Message> {
    batch
        .iter()
        .filter(|m| is_visible(m, self_identity) && m.sender != self_identity)
        .collect()
}

/// Collapses a newest-first delta batch into at most one notification.
pub fn coalesce(batch: &[Message], self_identity: &str) -> Option<Notification> {
    let relevant = relevant(batch, self_identity);
    let newest = relevant.first()?;

    let severity = relevant
        .iter()
        .map(|m| classify(&m.body, self_identity))
        .max()
        .unwrap_or(Severity::Plain);

    let title = match severity {
        Severity::Everyone => "📢 @everyone Mentioned!".to_string(),
        Severity::SelfMention => "🔔 You were mentioned!".to_string(),
        Severity::Plain => format!("New message from {}", newest.sender),
    };

    Some(Notification {
        severity,
        title,
        sender: newest.sender.clone(),
        text: newest.body.clone(),
    })
}
