use std::time::Duration;

use thiserror::Error;

/// An error in how a fetcher or one of its tasks was set up.
///
/// These are raised eagerly, when a [`Resolution`](crate::clock::Resolution) or a
/// [`RefreshTask`](crate::task::RefreshTask) is created, and never during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A tick of zero length was requested.
    #[error("tick resolution must be greater than zero")]
    ZeroResolution,
    /// The refresh period of a task is shorter than a single tick.
    #[error("period {period:?} of task `{task}` is shorter than one tick of {resolution:?}")]
    PeriodTooShort {
        task: String,
        period: Duration,
        resolution: Duration,
    },
}
