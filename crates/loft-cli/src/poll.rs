//! Bounded polling.
//!
//! Every wait in the CLI (pod readiness, pod termination, DNS propagation,
//! tunnel health, sleep mode) goes through [`poll`] or [`poll_immediate`].
//!
//! The poller only implements the mechanism. Tolerance for transient failures
//! is the caller's decision: a predicate that wants to keep polling through an
//! error maps it to `Ok(false)`, anything returned as `Err` stops the poll.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::{Error, Result};

/// Interval and timeout for a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Wait one interval, then evaluate `check` at every interval boundary until it
/// returns `Ok(true)`, returns an error, or `spec.timeout` runs out.
pub async fn poll<F, Fut>(spec: PollSpec, description: &str, check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    run(spec, false, description, check).await
}

/// Like [`poll`] but evaluates `check` once before the first wait.
pub async fn poll_immediate<F, Fut>(spec: PollSpec, description: &str, check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    run(spec, true, description, check).await
}

async fn run<F, Fut>(spec: PollSpec, immediate: bool, description: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let timeout = |start: Instant| Error::Timeout {
        description: description.to_string(),
        elapsed: start.elapsed(),
    };

    if !immediate {
        if spec.interval > spec.timeout {
            tokio::time::sleep(spec.timeout).await;
            return Err(timeout(start));
        }
        tokio::time::sleep(spec.interval).await;
    }

    loop {
        if check().await? {
            return Ok(());
        }

        // Give up now rather than sleep past the deadline
        if start.elapsed() + spec.interval > spec.timeout {
            return Err(timeout(start));
        }

        debug!("Waiting for {}...", description);
        tokio::time::sleep(spec.interval).await;
    }
}
