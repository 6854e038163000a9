use std::cell::RefCell;
use std::rc::Rc;

use fetcher_service::FixedPolicy;

use crate::{Recorder, Script, millis, setup_harness};

#[test]
fn test_delivers_iff_strictly_newer() {
    let harness = setup_harness();
    let script = Script::new([Ok(1), Ok(2), Ok(3)]);
    let task = harness
        .fetcher
        .create_task("counter", script.producer(), millis(2), FixedPolicy::every_period())
        .unwrap();

    let recorder = Recorder::new();
    let mut feed = harness.fetcher.create_feed();
    feed.subscribe(&task, recorder.callback());

    let mut expected = Vec::new();
    for tick in 0..12 {
        let before = task.cached().map(|cached| cached.produced_at);
        feed.tick(harness.at(tick));
        let after = task.cached().map(|cached| cached.produced_at);

        if after > before {
            expected.push(task.cached().unwrap().value);
        }
        assert_eq!(recorder.values(), expected, "tick {tick}");

        if tick % 3 == 0 {
            harness.executor.run_pending();
        }
    }

    assert_eq!(recorder.values(), vec![1, 2, 3, 3]);
}

#[test]
fn test_subscribe_backfills_without_tick() {
    let harness = setup_harness();
    let task = harness
        .fetcher
        .create_task(
            "greeting",
            Script::constant("hello".to_owned()).producer(),
            millis(10),
            FixedPolicy::every_period(),
        )
        .unwrap();

    // nothing cached yet, so nothing to backfill
    let early = Recorder::new();
    let mut feed = harness.fetcher.create_feed();
    feed.subscribe(&task, early.callback());
    assert!(early.is_empty());

    feed.tick(harness.at(0));
    harness.complete_at(1);
    feed.tick(harness.at(1));

    let late = Recorder::new();
    feed.subscribe(&task, late.callback());
    assert_eq!(late.values(), vec!["hello"]);

    // the backfill counts as a delivery
    feed.tick(harness.at(2));
    assert_eq!(early.len(), 1);
    assert_eq!(late.len(), 1);
}

#[test]
fn test_force_update_is_idempotent() {
    let harness = setup_harness();
    let script = Script::new([Ok('a'), Ok('b')]);
    let task = harness
        .fetcher
        .create_task("letters", script.producer(), millis(5), FixedPolicy::every_period())
        .unwrap();

    let recorder = Recorder::new();
    let mut feed = harness.fetcher.create_feed();
    feed.subscribe(&task, recorder.callback());

    feed.tick(harness.at(0));
    harness.complete_at(0);
    feed.tick(harness.at(1));

    for _ in 0..3 {
        feed.force_update();
    }
    assert_eq!(recorder.values(), vec!['a'; 4]);
    assert!(!task.is_computing());

    // regular ticks without a new value stay quiet after forcing
    feed.tick(harness.at(4));
    assert_eq!(recorder.len(), 4);

    feed.tick(harness.at(5));
    harness.complete_at(6);
    feed.tick(harness.at(6));
    assert_eq!(recorder.values(), vec!['a', 'a', 'a', 'a', 'b']);
}

#[test]
fn test_mixed_value_types_in_one_feed() {
    let harness = setup_harness();
    let names = harness
        .fetcher
        .create_task(
            "names",
            Script::constant(vec!["ann".to_owned(), "bob".to_owned()]).producer(),
            millis(3),
            FixedPolicy::every_period(),
        )
        .unwrap();
    let count = harness
        .fetcher
        .create_task(
            "count",
            Script::constant(2usize).producer(),
            millis(3),
            FixedPolicy::every_period(),
        )
        .unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut feed = harness.fetcher.create_feed();
    {
        let log = Rc::clone(&log);
        feed.subscribe(&names, move |names: &Vec<String>| {
            log.borrow_mut().push(names.join(","))
        });
    }
    {
        let log = Rc::clone(&log);
        feed.subscribe(&count, move |count: &usize| {
            log.borrow_mut().push(count.to_string())
        });
    }

    feed.tick(harness.at(0));
    assert_eq!(harness.complete_at(1), 2);
    feed.tick(harness.at(1));

    // callbacks run in subscription order
    assert_eq!(*log.borrow(), vec!["ann,bob", "2"]);
}

#[test]
fn test_subscriptions_track_deliveries_independently() {
    let harness = setup_harness();
    let script = Script::new([Ok(1), Ok(2)]);
    let task = harness
        .fetcher
        .create_task("numbers", script.producer(), millis(4), FixedPolicy::every_period())
        .unwrap();

    let ticked = Recorder::new();
    let idle = Recorder::new();
    let mut ticked_feed = harness.fetcher.create_feed();
    let mut idle_feed = harness.fetcher.create_feed();
    ticked_feed.subscribe(&task, ticked.callback());
    idle_feed.subscribe(&task, idle.callback());

    ticked_feed.tick(harness.at(0));
    harness.complete_at(0);
    ticked_feed.tick(harness.at(1));
    ticked_feed.tick(harness.at(4));
    harness.complete_at(4);
    ticked_feed.tick(harness.at(5));
    assert_eq!(ticked.values(), vec![1, 2]);

    // the idle feed skipped the first value entirely and only sees the latest
    idle_feed.tick(harness.at(5));
    assert_eq!(idle.values(), vec![2]);
}

#[test]
fn test_clear_and_len() {
    let harness = setup_harness();
    let task = harness
        .fetcher
        .create_task(
            "unit",
            Script::constant(()).producer(),
            millis(1),
            FixedPolicy::every_period(),
        )
        .unwrap();

    let mut feed = harness.fetcher.create_feed();
    assert!(feed.is_empty());
    feed.subscribe(&task, |_| {});
    feed.subscribe(&task, |_| {});
    assert_eq!(feed.len(), 2);

    feed.clear();
    assert!(feed.is_empty());

    // ticking an empty feed does nothing
    feed.tick(harness.at(0));
    assert!(!task.is_computing());
}

#[test]
fn test_callback_may_reset_its_task() {
    let harness = setup_harness();
    let script = Script::new([Ok(1), Ok(2)]);
    let task = harness
        .fetcher
        .create_task("reentrant", script.producer(), millis(50), FixedPolicy::every_period())
        .unwrap();

    let recorder = Recorder::new();
    let mut feed = harness.fetcher.create_feed();
    {
        let handle = task.clone();
        let mut record = recorder.callback();
        feed.subscribe(&task, move |value: &i32| {
            record(value);
            // start over right away, from inside the delivery
            handle.reset();
            handle.advance(1);
        });
    }

    feed.tick(harness.at(0));
    harness.complete_at(0);
    feed.tick(harness.at(1));

    assert_eq!(recorder.values(), vec![1]);
    assert!(task.cached().is_none());
    assert!(task.is_computing());

    harness.complete_at(2);
    feed.tick(harness.at(2));
    assert_eq!(recorder.values(), vec![1, 2]);
}
