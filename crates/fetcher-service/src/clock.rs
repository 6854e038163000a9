//! Time sources and the tick resolution used to quantize them.
//!
//! All scheduling in this crate happens in integer [`Tick`]s. A [`Clock`] reports monotonic
//! elapsed time, and a [`Resolution`] decides how long one tick is.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::ConfigurationError;

/// A point in time, counted in ticks of a [`Resolution`].
pub type Tick = u64;

/// A monotonic time source.
///
/// Implementations must never go backwards for the lifetime of the process. The clock is
/// read both on the tick thread and on executor threads when a computation completes.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since an arbitrary, fixed origin.
    fn elapsed(&self) -> Duration;
}

/// A [`Clock`] backed by [`Instant`], with its origin at construction time.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A [`Clock`] that only moves when told to.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// [`Fetcher`](crate::fetcher::Fetcher) and drive it through another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock to `elapsed`.
    ///
    /// Setting a time earlier than the current one is ignored, the clock stays monotonic.
    pub fn set(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_max(nanos, Ordering::SeqCst);
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let delta = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |nanos| {
                Some(nanos.saturating_add(delta))
            });
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// The length of one tick.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution(Duration);

impl Resolution {
    /// Creates a resolution of `tick` per tick.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::ZeroResolution`] if `tick` is zero.
    pub fn new(tick: Duration) -> Result<Self, ConfigurationError> {
        if tick.is_zero() {
            return Err(ConfigurationError::ZeroResolution);
        }
        Ok(Self(tick))
    }

    pub fn from_millis(millis: u64) -> Result<Self, ConfigurationError> {
        Self::new(Duration::from_millis(millis))
    }

    /// The duration of a single tick.
    pub fn tick(&self) -> Duration {
        self.0
    }

    /// Converts `duration` into whole ticks, truncating any remainder.
    pub fn ticks(&self, duration: Duration) -> Tick {
        let ticks = duration.as_nanos() / self.0.as_nanos();
        Tick::try_from(ticks).unwrap_or(Tick::MAX)
    }

    /// Reads `clock` and converts it into ticks.
    pub fn now(&self, clock: &dyn Clock) -> Tick {
        self.ticks(clock.elapsed())
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resolution({:?})", self.0)
    }
}

/// A [`Clock`] paired with the [`Resolution`] it is read at.
///
/// This is shared between a fetcher, its feeds, and the computations its tasks spawn, so
/// that everyone agrees on what "now" is.
#[derive(Clone)]
pub struct Timebase {
    clock: Arc<dyn Clock>,
    resolution: Resolution,
}

impl Timebase {
    pub fn new(clock: Arc<dyn Clock>, resolution: Resolution) -> Self {
        Self { clock, resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The current time in ticks.
    pub fn now(&self) -> Tick {
        self.resolution.now(self.clock.as_ref())
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timebase")
            .field("resolution", &self.resolution)
            .field("now", &self.now())
            .finish()
    }
}
