use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sketches_ddsketch::DDSketch;

use fetcher_service::config::Config;
use fetcher_service::{Fetcher, FixedPolicy, RefreshTask, TaskStatus};

use crate::workloads::{Counters, Sample, WorkloadsConfig};

/// Deliveries observed by the subscribers of one workload.
#[derive(Default)]
struct Deliveries {
    /// Time from a sample's creation to its callback, in seconds.
    lags: DDSketch,
    last_sequence: Option<usize>,
}

struct Run {
    name: String,
    subscribers: usize,
    task: RefreshTask<Sample>,
    counters: Arc<Counters>,
    deliveries: Rc<RefCell<Deliveries>>,
}

pub fn perform_stresstest(
    config: &Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let fetcher = Fetcher::from_config(config).context("failed to create fetcher")?;
    let default_policy = FixedPolicy::from(config.default_policy);
    let mut feed = fetcher.create_feed();

    // initialize workloads
    let mut runs = Vec::with_capacity(workloads.workloads.len());
    for (i, workload) in workloads.workloads.into_iter().enumerate() {
        let name = workload
            .name
            .clone()
            .unwrap_or_else(|| format!("workload-{i}"));
        let counters = Arc::new(Counters::default());
        let policy = workload.policy.map_or(default_policy, FixedPolicy::from);

        let task = fetcher
            .create_task(
                &name,
                workload.producer(Arc::clone(&counters)),
                workload.period,
                policy,
            )
            .with_context(|| format!("invalid workload {i}"))?;

        let deliveries = Rc::new(RefCell::new(Deliveries::default()));
        for _ in 0..workload.subscribers {
            let deliveries = Rc::clone(&deliveries);
            feed.subscribe(&task, move |sample: &Sample| {
                let mut deliveries = deliveries.borrow_mut();
                deliveries.lags.add(sample.created.elapsed().as_secs_f64());
                deliveries.last_sequence = Some(sample.sequence);
            });
        }

        runs.push(Run {
            name,
            subscribers: workload.subscribers,
            task,
            counters,
            deliveries,
        });
    }

    // run the frame loop, one frame per tick
    let frame = fetcher.resolution().tick();
    tracing::info!(frame = ?frame, workloads = runs.len(), "Starting stresstest");

    let start = Instant::now();
    let mut frames = 0u64;
    while start.elapsed() < duration {
        let frame_start = Instant::now();
        feed.tick_now();
        frames += 1;

        if let Some(rest) = frame.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    println!("Ran {frames} frames of {frame:?} in {:.2?}", start.elapsed());
    println!();

    for run in &runs {
        let computations = run.counters.computations.load(Ordering::Relaxed);
        let failures = run.counters.failures.load(Ordering::Relaxed);
        let deliveries = run.deliveries.borrow();
        let lags = &deliveries.lags;
        let count = lags.count();

        println!(
            "Workload {} (subscribers: {}): {computations} computations, {failures} failures, {count} deliveries",
            run.name, run.subscribers,
        );
        if let Some(last) = deliveries.last_sequence {
            println!("  last delivered computation: {last}");
        }
        if count > 0 {
            let avg = Duration::from_secs_f64(lags.sum().unwrap_or_default() / count as f64);
            let p50 = quantile(lags, 0.5);
            let p90 = quantile(lags, 0.9);
            let p99 = quantile(lags, 0.99);
            println!("  delivery lag avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }
    }
    println!();

    let statuses: Vec<TaskStatus> = runs.iter().map(|run| run.task.status()).collect();
    let statuses = serde_yaml::to_string(&statuses).context("failed to serialize task status")?;
    println!("Final task status (now: {}):", fetcher.now());
    print!("{statuses}");

    Ok(())
}

fn quantile(sketch: &DDSketch, q: f64) -> Duration {
    let seconds = sketch.quantile(q).ok().flatten().unwrap_or_default();
    Duration::from_secs_f64(seconds)
}
