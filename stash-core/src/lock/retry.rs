use super::Lock;
use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts, including the first one.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Multiplier applied to the delay after every retry.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base: DEFAULT_BASE_DELAY,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Retries `acquire` and `release` of the wrapped lock with exponential
/// backoff. Sleeps happen on the runtime polling the future; the last failure
/// is returned unchanged once the attempts are used up.
pub struct RetryLock<L> {
    origin: L,
    policy: RetryPolicy,
}

impl<L: Lock> RetryLock<L> {
    pub fn new(origin: L) -> Self {
        Self::with_policy(origin, RetryPolicy::default())
    }

    pub fn with_policy(origin: L, policy: RetryPolicy) -> Self {
        Self { origin, policy }
    }

    async fn retry<F, Fut>(&self, action: &str, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut delay = self.policy.base;
        let mut made = 1;

        loop {
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(e) if made >= attempts => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        "Lock {} attempt {}/{} failed, retrying in {:?}: {}",
                        action,
                        made,
                        attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.policy.factor);
                    made += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<L: Lock> Lock for RetryLock<L> {
    async fn acquire(&self) -> Result<()> {
        self.retry("acquire", || self.origin.acquire()).await
    }

    async fn release(&self) -> Result<()> {
        self.retry("release", || self.origin.release()).await
    }
}
