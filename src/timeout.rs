//! Timeout race for outbound calls
//!
//! [`with_timeout`] races a future against a timer. Whichever finishes first
//! wins; the loser is dropped, which cancels the pending timer (or the
//! unfinished operation) on both paths.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

/// Default budget for a call to the upstream provider
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(8);

/// Run `operation`, failing with [`Error::Timeout`] carrying `reason` if it
/// has not settled within `budget`.
pub async fn with_timeout<F, T>(operation: F, budget: Duration, reason: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if let Ok(outcome) = tokio::time::timeout(budget, operation).await {
        outcome
    } else {
        warn!(timeout = ?budget, reason, "Operation timed out");
        Err(Error::Timeout(reason.to_string()))
    }
}
