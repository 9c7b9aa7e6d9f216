// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How transient external-process and metadata failures are retried before
/// being escalated to a repository-scoped failure.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Runs `op` up to `max_attempts` times, doubling the delay between attempts.
/// The final error is returned unchanged so callers keep the upstream cause.
pub(crate) async fn with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    what: &str,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts => {
                warn!(%what, attempt, error = %e, "Transient failure, retrying after backoff");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
