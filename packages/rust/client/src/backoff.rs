//! Exponential backoff state for HTTP 429 responses.

use std::time::Duration;

use protocolsio_shared::BackoffPolicy;

/// Smallest delay used when a policy asks for zero; a zero delay would never
/// double its way up to the ceiling.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Tracks consecutive rate-limited attempts for a single request.
///
/// Each request starts a fresh `Backoff`, so a success implicitly resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    retries: u32,
    waited: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let initial = policy.initial.max(MIN_DELAY);
        Self {
            policy: BackoffPolicy { initial, ..policy },
            next: initial,
            retries: 0,
            waited: Duration::ZERO,
        }
    }

    /// Delay before the next retry, or `None` once the ceiling is reached.
    ///
    /// The Nth call returns `min(initial * 2^(N-1), max)`; a value that would
    /// equal the ceiling ends the retries instead.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.next >= self.policy.max {
            return None;
        }
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.policy.max);
        self.retries += 1;
        self.waited += delay;
        Some(delay)
    }

    /// Number of retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total time spent sleeping so far.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}
