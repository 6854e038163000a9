use std::sync::Arc;
use std::time::Duration;

use fetcher_service::{
    Executor, Fetcher, FixedPolicy, Resolution, RuntimeExecutor, SystemClock, ThreadPoolExecutor,
};

use crate::{Gate, Recorder, Script, setup, wait_until};

const TIMEOUT: Duration = Duration::from_secs(10);

fn system_fetcher(executor: Arc<dyn Executor>) -> Fetcher {
    setup();
    Fetcher::new(
        executor,
        Arc::new(SystemClock::new()),
        Resolution::from_millis(1).unwrap(),
    )
}

#[test]
fn test_runtime_executor_does_not_block_ticks() {
    let executor = RuntimeExecutor::with_threads(2).unwrap();
    let fetcher = system_fetcher(Arc::new(executor));

    let gate = Gate::new();
    let task = {
        let gate = gate.clone();
        fetcher
            .create_task(
                "gated",
                move || {
                    gate.wait();
                    Ok::<_, anyhow::Error>("done")
                },
                Duration::from_millis(50),
                FixedPolicy::every_period(),
            )
            .unwrap()
    };

    let recorder = Recorder::new();
    let mut feed = fetcher.create_feed();
    feed.subscribe(&task, recorder.callback());

    // the producer is parked on a worker, ticking keeps returning
    for _ in 0..10 {
        feed.tick_now();
    }
    assert!(task.is_computing());
    assert!(recorder.is_empty());

    gate.open();
    wait_until(TIMEOUT, || {
        feed.tick_now();
        !recorder.is_empty()
    });
    assert_eq!(recorder.values(), vec!["done"]);
    assert!(task.next_eligible() >= 50);
}

#[test]
fn test_thread_pool_executor_reports_failures() {
    let executor = ThreadPoolExecutor::new(2).unwrap();
    let fetcher = system_fetcher(Arc::new(executor));

    let script = Script::new([Ok(1), Err("gone".to_owned())]);
    let task = fetcher
        .create_task(
            "pooled",
            script.producer(),
            Duration::from_millis(1),
            FixedPolicy::every_period(),
        )
        .unwrap();

    let recorder = Recorder::new();
    let mut feed = fetcher.create_feed();
    feed.subscribe(&task, recorder.callback());

    wait_until(TIMEOUT, || {
        feed.tick_now();
        script.calls() >= 3
    });

    // failures after the first success never reach the callback
    assert_eq!(recorder.values(), vec![1]);
    assert_eq!(task.cached().unwrap().value, 1);
}

#[test]
fn test_reset_abandons_work_on_worker_threads() {
    let executor = RuntimeExecutor::with_threads(2).unwrap();
    let fetcher = system_fetcher(Arc::new(executor));

    let gate = Gate::new();
    let script = Script::new([Ok("stale".to_owned()), Ok("fresh".to_owned())]);
    let task = {
        let gate = gate.clone();
        let producer = script.producer();
        fetcher
            .create_task(
                "abandoned",
                move || {
                    gate.wait();
                    producer()
                },
                Duration::from_secs(60),
                FixedPolicy::every_period(),
            )
            .unwrap()
    };

    let recorder = Recorder::new();
    let mut feed = fetcher.create_feed();
    feed.subscribe(&task, recorder.callback());

    feed.tick_now();
    assert!(task.is_computing());
    feed.reset();
    feed.tick_now();
    assert!(task.is_computing());

    // both computations finish, only the second one is still observed
    gate.open();
    wait_until(TIMEOUT, || {
        feed.tick_now();
        !recorder.is_empty()
    });
    wait_until(TIMEOUT, || script.calls() == 2);

    let value = task.cached().unwrap().value.clone();
    assert_eq!(recorder.values(), vec![value]);
    assert!(!task.is_computing());
}
