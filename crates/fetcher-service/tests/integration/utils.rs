use std::sync::Arc;
use std::time::Duration;

use fetcher_service::{DeferredExecutor, Fetcher, ManualClock, Resolution, Tick};

pub use fetcher_test::{Gate, Recorder, Script, setup, wait_until};

/// A fetcher whose clock and executor are both driven by the test.
///
/// One tick is one millisecond.
pub struct Harness {
    pub fetcher: Fetcher,
    pub clock: ManualClock,
    pub executor: DeferredExecutor,
}

impl Harness {
    /// Moves the clock to `tick` and returns it, for use as `feed.tick(harness.at(3))`.
    pub fn at(&self, tick: Tick) -> Tick {
        self.clock.set(Duration::from_millis(tick));
        tick
    }

    /// Moves the clock to `tick` and completes every queued computation there.
    pub fn complete_at(&self, tick: Tick) -> usize {
        self.at(tick);
        self.executor.run_pending()
    }
}

/// Sets up logging and creates a [`Harness`].
pub fn setup_harness() -> Harness {
    setup();

    let clock = ManualClock::new();
    let executor = DeferredExecutor::new();
    let fetcher = Fetcher::new(
        Arc::new(executor.clone()),
        Arc::new(clock.clone()),
        Resolution::from_millis(1).unwrap(),
    );

    Harness {
        fetcher,
        clock,
        executor,
    }
}

pub fn millis(tick: Tick) -> Duration {
    Duration::from_millis(tick)
}
