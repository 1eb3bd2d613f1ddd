//! Upstash-style REST transport.
//!
//! One blocking POST per command with a short timeout. Every failure mode is
//! folded into [`StoreError`] so callers see a single failure signal.

use super::StoreClient;
use crate::error::{ChatError, StoreError};
use chat_protocol::{Command, Reply};
use reqwest::blocking::Client;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 200;

pub struct HttpStore {
    client: Client,
    url: String,
    token: String,
}

impl HttpStore {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChatError::ConfigInvalid(format!("HTTP client setup failed: {}", err)))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStore")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl StoreClient for HttpStore {
    fn execute(&self, command: &Command) -> Result<Value, StoreError> {
        let name = command.name();
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(command)
            .send()
            .map_err(|err| StoreError::Transport {
                command: name.to_string(),
                details: err.to_string(),
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| StoreError::Transport {
            command: name.to_string(),
            details: format!("failed to read reply body: {}", err),
        })?;

        tracing::trace!(command = %name, status = status.as_u16(), "Store reply received");

        let reply = serde_json::from_str::<Reply>(&body);
        if let Ok(Reply {
            error: Some(message),
            ..
        }) = &reply
        {
            return Err(StoreError::Rejected {
                command: name.to_string(),
                message: message.clone(),
            });
        }

        if !status.is_success() {
            return Err(StoreError::Status {
                command: name.to_string(),
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        match reply {
            Ok(reply) => reply
                .into_result()
                .map_err(|err| StoreError::malformed(name, err.to_string())),
            Err(err) => Err(StoreError::malformed(name, err.to_string())),
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut clipped: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    clipped.push('…');
    clipped
}
