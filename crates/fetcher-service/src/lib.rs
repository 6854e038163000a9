//! # Fetcher
//!
//! A self-refreshing data cache. A [`RefreshTask`] periodically re-runs a possibly slow
//! producer function on an [`Executor`], caches the value of its most recent successful run
//! together with the tick it completed at, and a [`Feed`] notifies callbacks only when that
//! cached value actually advances.
//!
//! ## Driving
//!
//! Nothing runs in the background. The application calls [`Feed::tick`] (or
//! [`Feed::tick_now`]) once per frame, which for every subscription:
//!
//! 1. consumes a finished computation of the task, if there is one,
//! 2. starts a new computation if the task is idle and due,
//! 3. calls the callback if the cached value is newer than what it received last.
//!
//! Scheduling and all cache state live on the ticking thread. Only the producer runs
//! elsewhere, and it reports back through a one-shot channel.
//!
//! ## Cadence
//!
//! A task never has more than one computation in flight. When a computation completes, the
//! next one becomes eligible `period × cycles` ticks later, where [`RefreshPolicy`] decides
//! the number of cycles separately for successes and failures. A failure never replaces the
//! cached value: subscribers keep the last good value and simply hear nothing new until the
//! producer succeeds again.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use fetcher_service::{FixedPolicy, Fetcher, InlineExecutor, ManualClock, Resolution};
//!
//! let clock = ManualClock::new();
//! let fetcher = Fetcher::new(
//!     Arc::new(InlineExecutor),
//!     Arc::new(clock.clone()),
//!     Resolution::from_millis(100).unwrap(),
//! );
//! let players = fetcher
//!     .create_task(
//!         "players",
//!         || Ok::<_, std::io::Error>(3),
//!         Duration::from_secs(1),
//!         FixedPolicy::every_period(),
//!     )
//!     .unwrap();
//!
//! let mut feed = fetcher.create_feed();
//! feed.subscribe(&players, |count| println!("{count} players online"));
//!
//! feed.tick_now(); // starts the first computation
//! clock.advance(Duration::from_millis(100));
//! feed.tick_now(); // picks up the result and prints it
//! ```

#[macro_use]
pub mod metrics;

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod feed;
pub mod fetcher;
pub mod logging;
pub mod policy;
pub mod task;

pub use clock::{Clock, ManualClock, Resolution, SystemClock, Tick};
pub use error::ConfigurationError;
pub use executor::{
    DeferredExecutor, Executor, InlineExecutor, RuntimeExecutor, ThreadPoolExecutor,
};
pub use feed::Feed;
pub use fetcher::Fetcher;
pub use policy::{FixedPolicy, RefreshPolicy};
pub use task::{CachedValue, Outcome, RefreshTask, TaskStatus};
