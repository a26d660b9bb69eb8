//! Connection modes and scoped mode overrides.
//!
//! A [`Mode`] decides how much connectivity checking happens around a single invocation of a
//! unit of work:
//!
//! - `Unchecked`: use whatever handle is held, no probe.
//! - `Checked`: probe first and reconnect when the handle is gone.
//! - `Fixup`: run optimistically; if the run fails and a probe shows the handle died, reconnect
//!   and run once more.
//!
//! Modes parse from and display as `unchecked`, `checked` and `fixup` so they can be set from
//! configuration.

use std::fmt;
use std::str::FromStr;

/// Connectivity policy applied to one invocation of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// Invoke directly against the held handle.
    Unchecked,
    /// Probe before invoking; reconnect when disconnected.
    #[default]
    Checked,
    /// Invoke first; reconnect and invoke again only if the failure left the handle disconnected.
    Fixup,
}

impl Mode {
    /// Lowercase configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Unchecked => "unchecked",
            Mode::Checked => "checked",
            Mode::Fixup => "fixup",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connection mode `{0}` (expected unchecked, checked or fixup)")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unchecked" => Ok(Mode::Unchecked),
            "checked" => Ok(Mode::Checked),
            "fixup" => Ok(Mode::Fixup),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Scoped override of the effective mode.
///
/// Installs the resolved mode on creation and puts the previous value back when dropped, so the
/// slot is restored on success, on error, and when the owning future is dropped mid-flight.
#[derive(Debug)]
pub(crate) struct ModeScope<'a> {
    slot: &'a mut Mode,
    prior: Mode,
}

impl<'a> ModeScope<'a> {
    pub(crate) fn enter(slot: &'a mut Mode, mode: Mode) -> Self {
        let prior = std::mem::replace(slot, mode);
        Self { slot, prior }
    }

    pub(crate) fn mode(&self) -> Mode {
        *self.slot
    }
}

impl Drop for ModeScope<'_> {
    fn drop(&mut self) {
        *self.slot = self.prior;
    }
}
