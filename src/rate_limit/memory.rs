//! In-process window counters for single-instance deployments

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{WindowCount, WindowStore};
use crate::Result;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// Window counters held in a `DashMap`.
///
/// Increment and expiry happen under the entry's shard lock, so concurrent
/// callers never both observe the same count.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Window>,
}

impl MemoryWindowStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live and expired windows currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no windows are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn purge_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| w.expires_at > now);
    }
}
