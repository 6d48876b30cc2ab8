//! Delay policies between reconnection attempts.

use rand::Rng;
use std::time::Duration;

/// Doubling delay, capped, scaled by a random factor around 1.
///
/// The n-th delay (from 0) is `min(max_delay, base * 2^n) * U(1 - jitter, 1 + jitter)`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 0.1)
    }
}

impl ExponentialBackoff {
    /// `jitter_factor` is clamped to `[0, 1]`.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay for the current attempt. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let capped = self.base.saturating_mul(factor).min(self.max_delay);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter_factor == 0.0 {
            return capped;
        }
        let scale = rand::thread_rng()
            .gen_range(1.0 - self.jitter_factor..=1.0 + self.jitter_factor);
        capped.mul_f64(scale)
    }

    /// Start over from `base`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Delay policy applied between stream reconnection attempts.
///
/// Bitstamp tolerates a steady reconnect cadence, so the stream defaults to
/// `Fixed`; `Exponential` is available for endpoints that rate-limit handshakes.
#[derive(Debug, Clone)]
pub enum ReconnectBackoff {
    /// Same delay before every attempt.
    Fixed { delay: Duration, attempt: u32 },
    /// Growing delay with jitter.
    Exponential(ExponentialBackoff),
}

impl ReconnectBackoff {
    /// Fixed-interval policy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay, attempt: 0 }
    }

    /// Exponential policy with the given parameters.
    pub fn exponential(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self::Exponential(ExponentialBackoff::new(base, max_delay, jitter_factor))
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        match self {
            Self::Fixed { delay, attempt } => {
                *attempt = attempt.saturating_add(1);
                *delay
            }
            Self::Exponential(backoff) => backoff.next_delay(),
        }
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        match self {
            Self::Fixed { attempt, .. } => *attempt = 0,
            Self::Exponential(backoff) => backoff.reset(),
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Fixed { attempt, .. } => *attempt,
            Self::Exponential(backoff) => backoff.attempt(),
        }
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(10))
    }
}
