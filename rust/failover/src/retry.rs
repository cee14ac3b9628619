//! Fixed-interval polling with a wall-clock deadline.
//!
//! [`retry_with_timeout`] is the building block every other wait in this crate is made of. It
//! keeps calling a probe until the probe succeeds or the [`RetryPolicy::timeout`] has elapsed and
//! hands back whatever the last attempt returned. There is no dedicated timeout error: a caller
//! that gives up sees the reason the probe itself reported last.

use std::{fmt::Display, future::Future, time::Duration};

use snafu::{Snafu, ensure};
use tokio::time::{Instant, sleep};

use crate::constants::{
    DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_TIMEOUT, ELECTION_RECORD_RETRY_INTERVAL,
    ELECTION_RECORD_RETRY_TIMEOUT,
};

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("retry interval must be greater than zero"))]
    ZeroInterval,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        ensure!(!interval.is_zero(), ZeroIntervalSnafu);
        Ok(Self { timeout, interval })
    }

    /// Policy used while waiting for a leader election record to converge.
    pub fn leader_election() -> Self {
        Self {
            timeout: ELECTION_RECORD_RETRY_TIMEOUT,
            interval: ELECTION_RECORD_RETRY_INTERVAL,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RETRY_TIMEOUT,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Calls `probe` until it returns `Ok` or `policy.timeout()` has passed since the first call.
///
/// The first attempt happens immediately and at least one attempt is always made. After a failed
/// attempt the deadline is checked before sleeping: if time remains, the engine sleeps for the
/// full interval and tries again, otherwise the failure of that attempt is returned unchanged.
pub async fn retry_with_timeout<T, E, F, Fut>(policy: &RetryPolicy, mut probe: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    // `None` if the timeout reaches past what the clock can represent, i.e. no deadline
    let deadline = Instant::now().checked_add(policy.timeout);
    let mut result = probe().await;

    while let Err(error) = &result {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        tracing::warn!(%error, "Probe failed");
        sleep(policy.interval).await;
        match deadline {
            Some(deadline) => tracing::warn!(
                "Retrying... Timeout in {} seconds",
                deadline.saturating_duration_since(Instant::now()).as_secs()
            ),
            None => tracing::warn!("Retrying..."),
        }
        result = probe().await;
    }

    result
}
