//! Randomization of backoff pauses.
//!
//! Many workers reconnecting to the same failed-over database retry in lockstep unless their
//! pauses are spread out.
//!
//! - `None`: the scheduled pause as-is.
//! - `Full`: uniform in `[0, pause]`.
//! - `Equal`: uniform in `[pause/2, pause]`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied to each scheduled pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    #[default]
    None,
    Full,
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Randomize `pause` with the thread-local RNG.
    pub fn apply(&self, pause: Duration) -> Duration {
        self.apply_with_rng(pause, &mut rng())
    }

    /// Randomize `pause` with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, pause: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => pause,
            Jitter::Full => {
                let millis = whole_millis(pause);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                let millis = whole_millis(pause);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
        }
    }
}

fn whole_millis(pause: Duration) -> u64 {
    pause.as_millis().try_into().unwrap_or(u64::MAX)
}
