//! Wire types shared by redis-chat clients.
//!
//! The remote store speaks an Upstash-style REST dialect: a command is a JSON
//! array of strings (`["LPUSH", "chat:messages", "{...}"]`) and a reply is an
//! object carrying either `result` or `error`. Ledger entries are JSON
//! documents stored as list elements; their field names are shared with every
//! client that ever wrote to the ledger, so they must not drift.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

pub const MESSAGES_KEY: &str = "chat:messages";
pub const USERS_KEY: &str = "chat:users";
pub const PRESENCE_KEY: &str = "chat:online_users_zset";
pub const SHARED_ASSISTANT_KEY: &str = "chat:config:gemini_key";

/// Reserved mention that addresses every participant.
pub const EVERYONE: &str = "everyone";
pub const MAX_IDENTITY_CHARS: usize = 20;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

// ═══════════════════════════════════════════════════════════════════════════════
// Store commands
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Lpush,
    Lrange,
    Llen,
    Sadd,
    Smembers,
    Zadd,
    Zremrangebyscore,
    Zcard,
    Get,
    Set,
    Del,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Lpush => "LPUSH",
            Verb::Lrange => "LRANGE",
            Verb::Llen => "LLEN",
            Verb::Sadd => "SADD",
            Verb::Smembers => "SMEMBERS",
            Verb::Zadd => "ZADD",
            Verb::Zremrangebyscore => "ZREMRANGEBYSCORE",
            Verb::Zcard => "ZCARD",
            Verb::Get => "GET",
            Verb::Set => "SET",
            Verb::Del => "DEL",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let verb = match name.to_ascii_uppercase().as_str() {
            "LPUSH" => Verb::Lpush,
            "LRANGE" => Verb::Lrange,
            "LLEN" => Verb::Llen,
            "SADD" => Verb::Sadd,
            "SMEMBERS" => Verb::Smembers,
            "ZADD" => Verb::Zadd,
            "ZREMRANGEBYSCORE" => Verb::Zremrangebyscore,
            "ZCARD" => Verb::Zcard,
            "GET" => Verb::Get,
            "SET" => Verb::Set,
            "DEL" => Verb::Del,
            _ => return None,
        };
        Some(verb)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single store command: a verb plus its string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    args: Vec<String>,
}

impl Command {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn name(&self) -> &'static str {
        self.verb.as_str()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Rebuilds a command from its wire form (`["VERB", "arg", ...]`).
    pub fn from_parts(parts: Vec<String>) -> Result<Self, ProtocolError> {
        let mut parts = parts.into_iter();
        let name = parts
            .next()
            .ok_or_else(|| ProtocolError::new("empty_command", "command array is empty"))?;
        let verb = Verb::parse(&name).ok_or_else(|| {
            ProtocolError::new("unknown_command", format!("unsupported command {}", name))
        })?;
        Ok(Self {
            verb,
            args: parts.collect(),
        })
    }

    pub fn lpush(key: &str, value: impl Into<String>) -> Self {
        Self::new(Verb::Lpush).arg(key).arg(value)
    }

    /// Inclusive index range, newest entry at index 0.
    pub fn lrange(key: &str, start: i64, stop: i64) -> Self {
        Self::new(Verb::Lrange)
            .arg(key)
            .arg(start.to_string())
            .arg(stop.to_string())
    }

    pub fn llen(key: &str) -> Self {
        Self::new(Verb::Llen).arg(key)
    }

    pub fn sadd(key: &str, member: impl Into<String>) -> Self {
        Self::new(Verb::Sadd).arg(key).arg(member)
    }

    pub fn smembers(key: &str) -> Self {
        Self::new(Verb::Smembers).arg(key)
    }

    pub fn zadd(key: &str, score: i64, member: impl Into<String>) -> Self {
        Self::new(Verb::Zadd)
            .arg(key)
            .arg(score.to_string())
            .arg(member)
    }

    /// Removes every member scored strictly below `cutoff`.
    pub fn zrem_below(key: &str, cutoff: i64) -> Self {
        Self::new(Verb::Zremrangebyscore)
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", cutoff))
    }

    pub fn zcard(key: &str) -> Self {
        Self::new(Verb::Zcard).arg(key)
    }

    pub fn get(key: &str) -> Self {
        Self::new(Verb::Get).arg(key)
    }

    pub fn set(key: &str, value: impl Into<String>) -> Self {
        Self::new(Verb::Set).arg(key).arg(value)
    }

    pub fn del(key: &str) -> Self {
        Self::new(Verb::Del).arg(key)
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.args.len() + 1))?;
        seq.serialize_element(self.verb.as_str())?;
        for arg in &self.args {
            seq.serialize_element(arg)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = Vec::<String>::deserialize(deserializer)?;
        Command::from_parts(parts).map_err(D::Error::custom)
    }
}

/// Store reply body. Exactly one of `result` / `error` is meaningful; a
/// `null` result (e.g. `GET` on a missing key) decodes as `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, ProtocolError> {
        match self.error {
            Some(message) => Err(ProtocolError::new("store_error", message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ledger entries
// ═══════════════════════════════════════════════════════════════════════════════

/// One chat message as persisted in the ledger.
///
/// `recipients` is non-empty only for silent messages. A silent message with
/// no recipients is visible to its sender alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "username")]
    pub sender: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(rename = "is_silent", default)]
    pub silent: bool,
}

impl Message {
    pub fn public(sender: impl Into<String>, body: impl Into<String>, timestamp: String) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            timestamp,
            recipients: Vec::new(),
            silent: false,
        }
    }

    pub fn silent(
        sender: impl Into<String>,
        body: impl Into<String>,
        timestamp: String,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            timestamp,
            recipients,
            silent: true,
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        validate_identity(&self.sender)?;
        if !self.silent && !self.recipients.is_empty() {
            return Err(ProtocolError::new(
                "invalid_recipients",
                "recipients are only allowed on silent messages",
            ));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        self.validate()?;
        serde_json::to_string(self).map_err(|err| {
            ProtocolError::new(
                "encode_failed",
                format!("failed to serialize message: {}", err),
            )
        })
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

/// Decodes one ledger entry.
///
/// Entries written by older clients may omit optional fields; those default.
/// Recipients on a non-silent entry are dropped.
pub fn decode_message(raw: &str) -> Result<Message, ProtocolError> {
    let mut message: Message = serde_json::from_str(raw).map_err(|err| {
        ProtocolError::new(
            "invalid_message",
            format!("ledger entry is not a message: {}", err),
        )
    })?;
    if message.sender.trim().is_empty() {
        return Err(ProtocolError::new("missing_field", "username is required"));
    }
    if !message.silent {
        message.recipients.clear();
    }
    Ok(message)
}

/// Trims and checks a candidate identity, returning the normalized form.
pub fn validate_identity(candidate: &str) -> Result<String, ProtocolError> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::new("invalid_identity", "username is required"));
    }
    if trimmed.chars().count() > MAX_IDENTITY_CHARS {
        return Err(ProtocolError::new(
            "invalid_identity",
            format!(
                "username must be {} characters or fewer",
                MAX_IDENTITY_CHARS
            ),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn command_serializes_as_flat_array() {
        let command = Command::lpush(MESSAGES_KEY, "{}");
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"["LPUSH","chat:messages","{}"]"#);
    }

    #[test]
    fn zrem_below_uses_exclusive_upper_bound() {
        let command = Command::zrem_below(PRESENCE_KEY, 1_700_000_000);
        assert_eq!(command.verb(), Verb::Zremrangebyscore);
        assert_eq!(
            command.args(),
            &[
                PRESENCE_KEY.to_string(),
                "-inf".to_string(),
                "(1700000000".to_string()
            ]
        );
    }

    #[test]
    fn command_parses_from_wire_form() {
        let command: Command = serde_json::from_str(r#"["llen","chat:messages"]"#).unwrap();
        assert_eq!(command, Command::llen(MESSAGES_KEY));
    }

    #[test]
    fn command_rejects_unknown_verb() {
        let err = Command::from_parts(vec!["FLUSHALL".to_string()]).unwrap_err();
        assert_eq!(err.code, "unknown_command");
        assert!(Command::from_parts(Vec::new()).is_err());
    }

    #[test]
    fn reply_maps_null_result_and_errors() {
        let reply: Reply = serde_json::from_str(r#"{"result":null}"#).unwrap();
        assert_eq!(reply.into_result().unwrap(), Value::Null);

        let reply: Reply = serde_json::from_str(r#"{"error":"WRONGTYPE"}"#).unwrap();
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, "store_error");
        assert_eq!(err.message, "WRONGTYPE");
    }

    #[test]
    fn decodes_entry_with_missing_optional_fields() {
        let message = decode_message(r#"{"username":"alice","message":"hi"}"#).unwrap();
        assert_eq!(message.sender, "alice");
        assert_eq!(message.body, "hi");
        assert!(message.timestamp.is_empty());
        assert!(message.recipients.is_empty());
        assert!(!message.silent);
    }

    #[test]
    fn decode_drops_recipients_on_public_entry() {
        let raw = r#"{"username":"a","message":"x","recipients":["b"],"is_silent":false}"#;
        let message = decode_message(raw).unwrap();
        assert!(message.recipients.is_empty());
    }

    #[test]
    fn decode_rejects_garbage_and_anonymous_entries() {
        assert!(decode_message("not json").is_err());
        assert!(decode_message(r#"{"message":"x"}"#).is_err());
        assert!(decode_message(r#"{"username":"  ","message":"x"}"#).is_err());
    }

    #[test]
    fn encode_uses_legacy_field_names() {
        let message = Message::silent(
            "alice",
            "@bob secret",
            "2026-01-07 10:00:00".to_string(),
            vec!["bob".to_string()],
        );
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(value["username"], "alice");
        assert_eq!(value["message"], "@bob secret");
        assert_eq!(value["recipients"][0], "bob");
        assert_eq!(value["is_silent"], true);
    }

    #[test]
    fn encode_rejects_recipients_on_public_message() {
        let mut message = Message::public("alice", "hi", String::new());
        message.recipients.push("bob".to_string());
        assert!(message.encode().is_err());
    }

    #[test]
    fn identity_validation_trims_and_bounds_length() {
        assert_eq!(validate_identity("  bob ").unwrap(), "bob");
        assert!(validate_identity("").is_err());
        assert!(validate_identity("   ").is_err());
        assert!(validate_identity(&"x".repeat(MAX_IDENTITY_CHARS)).is_ok());
        assert!(validate_identity(&"x".repeat(MAX_IDENTITY_CHARS + 1)).is_err());
    }

    #[test]
    fn timestamp_round_trips_through_created_at() {
        let now = Utc::now();
        let message = Message::public("alice", "hi", format_timestamp(&now));
        let parsed = message.created_at().expect("timestamp parses");
        assert_eq!(parsed.format(TIMESTAMP_FORMAT).to_string(), message.timestamp);
    }
}
