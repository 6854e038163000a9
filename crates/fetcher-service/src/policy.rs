//! Refresh cadences.
//!
//! A [`RefreshPolicy`] says how many periods a [`RefreshTask`](crate::task::RefreshTask)
//! waits before computing again, counted from the moment its last computation completed.
//! Successes and failures have separate cadences, so a task can poll every period while
//! healthy and back off while its producer keeps failing.

use std::num::NonZeroU32;

use serde::Deserialize;

/// How many periods to wait after a computation before the next one may start.
pub trait RefreshPolicy: Send + Sync {
    /// Periods to wait after a successful computation.
    fn cycles_after_success(&self) -> NonZeroU32;

    /// Periods to wait after a failed computation.
    fn cycles_after_failure(&self) -> NonZeroU32;
}

/// A [`RefreshPolicy`] with constant cadences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPolicy {
    pub on_success: NonZeroU32,
    pub on_failure: NonZeroU32,
}

impl FixedPolicy {
    pub const fn new(on_success: NonZeroU32, on_failure: NonZeroU32) -> Self {
        Self {
            on_success,
            on_failure,
        }
    }

    /// Refreshes once every period, regardless of the outcome.
    pub const fn every_period() -> Self {
        Self::new(NonZeroU32::MIN, NonZeroU32::MIN)
    }

    /// Refreshes every period on success, and waits `factor` periods after a failure.
    pub const fn with_backoff(factor: NonZeroU32) -> Self {
        Self::new(NonZeroU32::MIN, factor)
    }
}

impl Default for FixedPolicy {
    fn default() -> Self {
        PolicyConfig::default().into()
    }
}

impl RefreshPolicy for FixedPolicy {
    fn cycles_after_success(&self) -> NonZeroU32 {
        self.on_success
    }

    fn cycles_after_failure(&self) -> NonZeroU32 {
        self.on_failure
    }
}

/// Configuration of a [`FixedPolicy`].
///
/// Zero is not a valid cycle count, which `serde` enforces through [`NonZeroU32`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Periods to wait after a success.
    pub on_success: NonZeroU32,
    /// Periods to wait after a failure.
    pub on_failure: NonZeroU32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_success: NonZeroU32::MIN,
            on_failure: NonZeroU32::new(8).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl From<PolicyConfig> for FixedPolicy {
    fn from(config: PolicyConfig) -> Self {
        Self::new(config.on_success, config.on_failure)
    }
}
