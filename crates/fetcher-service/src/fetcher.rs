use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::clock::{Clock, Resolution, SystemClock, Tick, Timebase};
use crate::config::Config;
use crate::error::ConfigurationError;
use crate::executor::{self, Executor};
use crate::feed::Feed;
use crate::policy::RefreshPolicy;
use crate::task::RefreshTask;

/// Creates [`RefreshTask`]s and [`Feed`]s that share one executor, clock and resolution.
#[derive(Clone)]
pub struct Fetcher {
    executor: Arc<dyn Executor>,
    timebase: Timebase,
}

impl Fetcher {
    pub fn new(executor: Arc<dyn Executor>, clock: Arc<dyn Clock>, resolution: Resolution) -> Self {
        Self {
            executor,
            timebase: Timebase::new(clock, resolution),
        }
    }

    /// Creates a fetcher with a [`SystemClock`] and the configured resolution and executor.
    pub fn from_config(config: &Config) -> Result<Self> {
        let resolution =
            Resolution::new(config.resolution).context("invalid fetcher resolution")?;
        let executor = executor::from_config(&config.executor)?;
        Ok(Self::new(executor, Arc::new(SystemClock::new()), resolution))
    }

    pub fn resolution(&self) -> Resolution {
        self.timebase.resolution()
    }

    /// The current time of this fetcher's clock, in ticks.
    pub fn now(&self) -> Tick {
        self.timebase.now()
    }

    /// Creates a task that runs `producer` every `period`, as scheduled by `policy`.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::PeriodTooShort`] if `period` is shorter than one tick
    /// of this fetcher's resolution.
    pub fn create_task<T, F, E, P>(
        &self,
        id: &str,
        producer: F,
        period: Duration,
        policy: P,
    ) -> Result<RefreshTask<T>, ConfigurationError>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        P: RefreshPolicy + 'static,
    {
        let resolution = self.resolution();
        let ticks = resolution.ticks(period);
        if ticks == 0 {
            return Err(ConfigurationError::PeriodTooShort {
                task: id.to_owned(),
                period,
                resolution: resolution.tick(),
            });
        }

        tracing::debug!(task = id, period = ticks, "Creating refresh task");
        Ok(RefreshTask::new(
            Arc::from(id),
            Arc::new(move || -> anyhow::Result<T> { producer().map_err(Into::into) }),
            ticks,
            Box::new(policy),
            Arc::clone(&self.executor),
            self.timebase.clone(),
        ))
    }

    /// Creates an empty feed that ticks on this fetcher's clock.
    pub fn create_feed(&self) -> Feed {
        Feed::new(self.timebase.clone())
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}
