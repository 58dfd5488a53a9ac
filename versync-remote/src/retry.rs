use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RemoteError;

/// Bounded exponential backoff for individual remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}
impl RetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_backoff, self.max_backoff)
    }
}

/// How long to keep polling while another actor holds the edit lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout: Duration,
    pub poll_base: Duration,
    pub poll_max: Duration,
}
impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy {
            // External validation workflows such as certificate issuance can
            // hold a lock this long.
            timeout: Duration::from_secs(45 * 60),
            poll_base: Duration::from_secs(1),
            poll_max: Duration::from_secs(60),
        }
    }
}
impl LockPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `base * 2^attempt`, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Run an idempotent read, retrying transport failures and lost responses.
pub async fn retry_read<T, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    retry_with(policy, what, RemoteError::retryable_for_read, op).await
}

/// Run a mutating call, retrying only failures where the call is known not to
/// have taken effect.
pub async fn retry_write<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    retry_with(policy, what, RemoteError::retryable_for_write, op).await
}

async fn retry_with<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    retryable: fn(&RemoteError) -> bool,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if retryable(&e) && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {} of {}), retrying in {:?}: {}",
                    what,
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Re-issue `op` while it fails with [`RemoteError::Locked`].
///
/// Gives up with [`RemoteError::LockTimeout`] once `policy.timeout` has
/// elapsed. Any other outcome is returned as is.
pub async fn poll_while_locked<T, F, Fut>(
    policy: &LockPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let start = Instant::now();
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_locked() => {
                let waited = start.elapsed();
                if waited >= policy.timeout {
                    return Err(RemoteError::LockTimeout { waited });
                }
                let delay = calculate_backoff(attempt, policy.poll_base, policy.poll_max)
                    .min(policy.timeout - waited);
                if attempt == 0 {
                    warn!("{}: {}; waiting for the lock", what, e);
                } else {
                    debug!("{}: still locked after {}s", what, waited.as_secs());
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use versync_core::{ServiceId, VersionNumber};

    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(calculate_backoff(0, base, max), Duration::from_millis(100));
        assert_eq!(calculate_backoff(3, base, max), Duration::from_millis(800));
        assert_eq!(calculate_backoff(4, base, max), max);
        assert_eq!(calculate_backoff(200, base, max), max);
    }

    #[tokio::test(start_paused = true)]
    async fn read_retries_lost_responses() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r = retry_read(&RetryPolicy::default(), "list", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::response_lost("reset"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(r, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn write_does_not_retry_lost_responses() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r: Result<(), _> = retry_write(&RetryPolicy::default(), "create", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::response_lost("reset"))
        })
        .await;
        assert!(matches!(r, Err(RemoteError::ResponseLost { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default().with_max_attempts(3);
        let r: Result<(), _> = retry_write(&policy, "update", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::transport("refused"))
        })
        .await;
        assert!(matches!(r, Err(RemoteError::Transport { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    fn locked() -> RemoteError {
        RemoteError::Locked {
            service: ServiceId::new("svc"),
            version: VersionNumber(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lock_polling_succeeds_once_released() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r = poll_while_locked(&LockPolicy::default(), "clone", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 5 {
                Err(locked())
            } else {
                Ok(2)
            }
        })
        .await;
        assert_eq!(r, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_polling_times_out() {
        let policy = LockPolicy::default().with_timeout(Duration::from_secs(30));
        let start = Instant::now();
        let r: Result<(), _> = poll_while_locked(&policy, "clone", move || async move { Err(locked()) }).await;
        match r {
            Err(RemoteError::LockTimeout { waited }) => {
                assert!(waited >= Duration::from_secs(30));
            }
            other => panic!("expected LockTimeout, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(31));
    }
}
