//! Plain-data executor settings.
//!
//! `ExecutorConfig` carries the settings that usually come from a configuration file. With the
//! `serde` feature enabled it deserializes from any serde format; missing fields take the defaults.
//!
//! ```rust
//! use secondwind::{ExecutorConfig, Mode};
//!
//! let config = ExecutorConfig { max_attempts: 3, default_mode: Mode::Fixup, ..Default::default() };
//! assert!(config.validate().is_ok());
//! ```

use crate::error::BuildError;
use crate::mode::Mode;

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Settings for a [`RetryExecutor`](crate::RetryExecutor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExecutorConfig {
    /// Failed attempts allowed per call before the last failure is returned. Must be > 0.
    pub max_attempts: usize,
    /// Mode used when a call does not override it.
    pub default_mode: Mode,
    /// Log every retried failure at `warn` level.
    pub debug_logging: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, default_mode: Mode::Checked, debug_logging: false }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(self.max_attempts));
        }
        Ok(())
    }
}
