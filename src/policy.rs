//! Retry rules applied by a [`RecyclingRunner`](crate::RecyclingRunner).
//!
//! Step failures are always answered by an immediate recycle, optionally capped by
//! [`RetryPolicy::max_recycles`]. Factory failures are retried after a [`BackoffPolicy`]
//! delay, up to [`RetryPolicy::max_factory_attempts`].

mod backoff;
pub use backoff::BackoffPolicy;

/// How a runner reacts to failing watchers and failing factories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total recycles allowed over the runner's lifetime. `None` recycles forever.
    pub max_recycles: Option<u64>,
    /// Consecutive factory calls allowed for one recreation. `None` retries forever.
    pub max_factory_attempts: Option<u32>,
    /// Delay between failed factory calls.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    /// Never gives up: every step failure is recycled and every factory failure retried.
    pub fn unbounded() -> Self {
        Self {
            max_recycles: None,
            max_factory_attempts: None,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Recycles forever, but the first factory failure ends the runner.
    pub fn fail_fast() -> Self {
        Self {
            max_factory_attempts: Some(1),
            ..Self::unbounded()
        }
    }

    /// Allows at most `max_recycles` recycles before the runner gives up.
    pub fn bounded(max_recycles: u64) -> Self {
        Self {
            max_recycles: Some(max_recycles),
            ..Self::unbounded()
        }
    }

    pub fn with_max_factory_attempts(mut self, attempts: u32) -> Self {
        self.max_factory_attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another recycle is allowed after `done` recycles.
    pub fn allows_recycle(&self, done: u64) -> bool {
        self.max_recycles.map_or(true, |max| done < max)
    }

    /// Whether the factory may be called again after `attempt` failed calls.
    pub fn allows_factory_retry(&self, attempt: u32) -> bool {
        self.max_factory_attempts.map_or(true, |max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_gives_up() {
        let policy = RetryPolicy::unbounded();
        assert!(policy.allows_recycle(u64::MAX - 1));
        assert!(policy.allows_factory_retry(u32::MAX - 1));
    }

    #[test]
    fn fail_fast_stops_after_first_factory_error() {
        let policy = RetryPolicy::fail_fast();
        assert!(!policy.allows_factory_retry(1));
        assert!(policy.allows_recycle(1_000));
    }

    #[test]
    fn bounded_counts_recycles() {
        let policy = RetryPolicy::bounded(2);
        assert!(policy.allows_recycle(0));
        assert!(policy.allows_recycle(1));
        assert!(!policy.allows_recycle(2));
    }

    #[test]
    fn builder_overrides_factory_attempts() {
        let policy = RetryPolicy::bounded(3).with_max_factory_attempts(4);
        assert_eq!(policy.max_recycles, Some(3));
        assert!(policy.allows_factory_retry(3));
        assert!(!policy.allows_factory_retry(4));
    }
}
