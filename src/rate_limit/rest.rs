//! Shared window counters in Redis, reached over a REST interface
//!
//! Speaks the Upstash-style REST protocol: commands are JSON arrays, and a
//! `POST /multi-exec` runs a batch as one MULTI/EXEC transaction. The batch
//! is `INCR` + `PEXPIRE .. NX` + `PTTL`, so the first increment of a window
//! also starts its clock and no caller can read-then-write a stale count.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{WindowCount, WindowStore};
use crate::timeout::with_timeout;
use crate::{Error, Result};

/// One entry of a `multi-exec` reply
#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Window counters kept in a shared Redis
pub struct RestWindowStore {
    http: Client,
    url: String,
    token: String,
    prefix: String,
    timeout: Duration,
}

impl std::fmt::Debug for RestWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestWindowStore")
            .field("url", &self.url)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RestWindowStore {
    /// Create a store
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            prefix: "ratelimit".to_string(),
            timeout,
        })
    }

    /// Namespace keys under `prefix` instead of `ratelimit`
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, client_key: &str) -> String {
        format!("{}:{client_key}", self.prefix)
    }

    /// Commands sent for one increment
    fn transaction(key: &str, window: Duration) -> Value {
        let window_ms = window.as_millis().max(1).to_string();
        json!([
            ["INCR", key],
            ["PEXPIRE", key, window_ms, "NX"],
            ["PTTL", key],
        ])
    }

    fn parse_reply(replies: &[CommandReply], window: Duration) -> Result<WindowCount> {
        if let Some(err) = replies.iter().find_map(|r| r.error.as_deref()) {
            return Err(Error::Transport(format!("rate limit store: {err}")));
        }

        let count = replies
            .first()
            .and_then(|r| r.result.as_ref())
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Transport("rate limit store: malformed INCR reply".to_string()))?;

        // PTTL is -1/-2 when no expiry is set; treat as a full window.
        let resets_in = replies
            .get(2)
            .and_then(|r| r.result.as_ref())
            .and_then(Value::as_i64)
            .and_then(|ms| u64::try_from(ms).ok())
            .map_or(window, Duration::from_millis);

        Ok(WindowCount { count, resets_in })
    }
}

#[async_trait]
impl WindowStore for RestWindowStore {
    async fn increment(&self, client_key: &str, window: Duration) -> Result<WindowCount> {
        let key = self.key(client_key);
        let request = self
            .http
            .post(format!("{}/multi-exec", self.url))
            .bearer_auth(&self.token)
            .json(&Self::transaction(&key, window));

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| Error::Transport(format!("rate limit store: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Transport(format!("rate limit store answered {status}")));
            }
            let replies: Vec<CommandReply> = response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("rate limit store: {e}")))?;
            Self::parse_reply(&replies, window)
        };

        let counted = with_timeout(call, self.timeout, "rate limit store").await?;
        debug!(key = %key, count = counted.count, "Window incremented");
        Ok(counted)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn replies(raw: Value) -> Vec<CommandReply> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_transaction_shape() {
        assert_eq!(
            RestWindowStore::transaction("ratelimit:1.2.3.4", Duration::from_secs(60)),
            json!([
                ["INCR", "ratelimit:1.2.3.4"],
                ["PEXPIRE", "ratelimit:1.2.3.4", "60000", "NX"],
                ["PTTL", "ratelimit:1.2.3.4"],
            ])
        );
    }

    #[test]
    fn test_parse_reply() {
        let parsed = RestWindowStore::parse_reply(
            &replies(json!([{ "result": 4 }, { "result": 0 }, { "result": 42_000 }])),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(parsed.count, 4);
        assert_eq!(parsed.resets_in, Duration::from_secs(42));
    }

    #[test]
    fn test_parse_reply_without_ttl() {
        let parsed = RestWindowStore::parse_reply(
            &replies(json!([{ "result": 1 }, { "result": 1 }, { "result": -1 }])),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(parsed.resets_in, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_reply_error() {
        let result = RestWindowStore::parse_reply(
            &replies(json!([{ "error": "WRONGTYPE" }])),
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn test_key_prefix() {
        let store = RestWindowStore::new("https://redis.example.com/", "t", Duration::from_secs(1))
            .unwrap()
            .with_prefix("magazine");
        assert_eq!(store.key("10.0.0.1"), "magazine:10.0.0.1");
        assert_eq!(store.url, "https://redis.example.com");
    }
}
