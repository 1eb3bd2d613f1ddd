//! Turns raw input lines into outgoing messages.
//!
//! `/silent` anywhere in the line makes the message private; every `@name`
//! in the line becomes a recipient. Without mentions a silent message is a
//! note visible only to its sender.

use crate::error::ChatError;
use crate::patterns::mentioned_identities;
use chat_protocol::Message;
use std::collections::BTreeSet;

pub const SILENT_FLAG: &str = "/silent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub body: String,
    pub silent: bool,
    pub recipients: Vec<String>,
}

impl Draft {
    pub fn public(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            silent: false,
            recipients: Vec::new(),
        }
    }

    pub fn into_message(self, sender: &str, timestamp: String) -> Message {
        if self.silent {
            Message::silent(sender, self.body, timestamp, self.recipients)
        } else {
            Message::public(sender, self.body, timestamp)
        }
    }
}

pub fn parse_input(raw: &str) -> Result<Draft, ChatError> {
    parse_input_with(raw, &BTreeSet::new())
}

/// Like [`parse_input`], but recipients that spell a `known` identity
/// (including ones with spaces or punctuation) resolve to that identity.
pub fn parse_input_with(raw: &str, known: &BTreeSet<String>) -> Result<Draft, ChatError> {
    let silent = raw.contains(SILENT_FLAG);
    let body = if silent {
        collapse_spaces(&raw.replace(SILENT_FLAG, ""))
    } else {
        raw.trim().to_string()
    };

    if body.is_empty() {
        return Err(ChatError::InvalidMessage("message is empty".to_string()));
    }

    let mut recipients: Vec<String> = Vec::new();
    if silent {
        for name in mentioned_identities(raw, known) {
            if !recipients.contains(&name) {
                recipients.push(name);
            }
        }
    }

    Ok(Draft {
        body,
        silent,
        recipients,
    })
}

/// Removing the flag from the middle of a line leaves a double space.
fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_input_is_public() {
        let draft = parse_input("  hello @bob  ").unwrap();
        assert_eq!(draft, Draft::public("hello @bob"));
    }

    #[test]
    fn silent_flag_is_stripped_and_mentions_become_recipients() {
        let draft = parse_input("@B secret /silent").unwrap();
        assert_eq!(draft.body, "@B secret");
        assert!(draft.silent);
        assert_eq!(draft.recipients, vec!["B".to_string()]);
    }

    #[test]
    fn silent_flag_mid_line_does_not_leave_gaps() {
        let draft = parse_input("@bob /silent see @carol @bob").unwrap();
        assert_eq!(draft.body, "@bob see @carol @bob");
        assert_eq!(draft.recipients, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[test]
    fn known_identities_resolve_whole_recipient_names() {
        let known: BTreeSet<String> = ["bob", "bob-x", "Mary Ann"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        let draft = parse_input_with("/silent @BOB-X and @mary ann, plus @zed", &known).unwrap();
        assert_eq!(draft.body, "@BOB-X and @mary ann, plus @zed");
        assert_eq!(
            draft.recipients,
            vec!["bob-x".to_string(), "Mary Ann".to_string(), "zed".to_string()]
        );
    }

    #[test]
    fn silent_without_mentions_is_sender_only_note() {
        let draft = parse_input("/silent remember the milk").unwrap();
        assert!(draft.silent);
        assert!(draft.recipients.is_empty());

        let message = draft.into_message("alice", String::new());
        assert!(message.silent);
        assert!(message.validate().is_ok());
    }

    #[test]
    fn empty_bodies_are_rejected() {
        assert!(parse_input("   ").is_err());
        assert!(parse_input("/silent").is_err());
    }

    #[test]
    fn public_draft_never_carries_recipients() {
        let message = parse_input("hi @bob")
            .unwrap()
            .into_message("alice", String::new());
        assert!(!message.silent);
        assert!(message.recipients.is_empty());
    }
}
