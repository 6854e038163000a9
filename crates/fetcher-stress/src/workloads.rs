use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;

use fetcher_service::policy::PolicyConfig;

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).context("failed to open workloads file")?;
        Self::from_reader(file)
    }

    fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        let config: Self =
            serde_yaml::from_reader(reader).context("failed to parse workloads YAML")?;
        for (i, workload) in config.workloads.iter().enumerate() {
            if !(0.0..=1.0).contains(&workload.failure_rate) {
                anyhow::bail!(
                    "failure_rate of workload {i} must be between 0 and 1, got {}",
                    workload.failure_rate
                );
            }
        }
        Ok(config)
    }
}

/// One synthetic task, observed by a number of subscribers.
#[derive(Debug, Deserialize)]
pub struct Workload {
    /// Used as the task id. Defaults to `workload-{index}`.
    pub name: Option<String>,
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// How long every producer invocation sleeps.
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
    /// The probability of a producer invocation failing.
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default = "default_subscribers")]
    pub subscribers: usize,
    /// Overrides the configured `default_policy`.
    pub policy: Option<PolicyConfig>,
}

fn default_subscribers() -> usize {
    1
}

/// What a synthetic producer computes.
#[derive(Debug)]
pub struct Sample {
    pub sequence: usize,
    pub created: Instant,
}

/// Producer invocations, shared with the executor threads running them.
#[derive(Debug, Default)]
pub struct Counters {
    pub computations: AtomicUsize,
    pub failures: AtomicUsize,
}

impl Workload {
    pub fn producer(
        &self,
        counters: Arc<Counters>,
    ) -> impl Fn() -> Result<Sample> + Send + Sync + use<> {
        let latency = self.latency;
        let failure_rate = self.failure_rate;
        move || {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            let sequence = counters.computations.fetch_add(1, Ordering::Relaxed);
            if rand::random::<f64>() < failure_rate {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                anyhow::bail!("synthetic failure of computation {sequence}");
            }
            Ok(Sample {
                sequence,
                created: Instant::now(),
            })
        }
    }
}
