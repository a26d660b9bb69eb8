//! Pause schedules between failed attempts.
//!
//! The executor retries immediately by default (`Backoff::None`). Configure a schedule when the
//! store needs time to recover, e.g. after a failover. Retry numbering starts at `1` for the pause
//! after the first failed attempt; `delay(0)` is always zero.
//!
//! ```rust
//! use std::time::Duration;
//! use secondwind::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(50))
//!     .with_max(Duration::from_millis(300))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(50));
//! assert_eq!(backoff.delay(3), Duration::from_millis(200));
//! assert_eq!(backoff.delay(9), Duration::from_millis(300));
//! ```

use std::time::Duration;

/// Upper bound on any computed pause (1 hour); larger results saturate here.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    CapNotSupported,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Schedule of pauses between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// The same pause before every retry.
    Constant(Duration),
    /// `base * retry`, optionally capped.
    Linear { base: Duration, max: Option<Duration> },
    /// `base * 2^(retry - 1)`, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap a linear or exponential schedule.
    pub fn with_max(self, cap: Duration) -> Result<Self, BackoffError> {
        if cap.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self {
            Backoff::Linear { base, .. } | Backoff::Exponential { base, .. } if cap < base => {
                Err(BackoffError::MaxLessThanBase { base, max: cap })
            }
            Backoff::Linear { base, .. } => Ok(Backoff::Linear { base, max: Some(cap) }),
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(cap) }),
            Backoff::None | Backoff::Constant(_) => Err(BackoffError::CapNotSupported),
        }
    }

    /// Pause before retry number `retry` (1-based).
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let raw = match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Constant(delay) => delay,
            Backoff::Linear { base, max } => {
                let factor = retry.min(u32::MAX as usize) as u32;
                cap(base.checked_mul(factor).unwrap_or(MAX_BACKOFF), max)
            }
            Backoff::Exponential { base, max } => {
                let exponent = (retry - 1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let grown = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                cap(grown, max)
            }
        };
        raw.min(MAX_BACKOFF)
    }
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    max.map_or(delay, |m| delay.min(m))
}
