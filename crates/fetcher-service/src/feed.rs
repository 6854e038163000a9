//! Fan-out of cached values to callbacks.
//!
//! A [`Feed`] binds [`RefreshTask`]s to callbacks. Each binding remembers the completion tick
//! of the value it delivered last, and only calls its callback again once the task has a
//! newer value. Equal values produced by two different computations are delivered twice.

use std::fmt;

use crate::clock::{Tick, Timebase};
use crate::task::RefreshTask;

/// The type-erased side of a binding, so that one feed can hold tasks of different types.
trait Subscription {
    fn tick(&mut self, now: Tick);
    fn force_update(&mut self);
    fn reset(&mut self);
}

struct Binding<T, F> {
    task: RefreshTask<T>,
    callback: F,
    /// `None` sorts before every tick, so the first cached value is always newer.
    last_delivered: Option<Tick>,
}

impl<T, F> Binding<T, F>
where
    F: FnMut(&T),
{
    fn deliver(&mut self, force: bool) {
        let Some(cached) = self.task.cached() else {
            return;
        };
        let produced_at = Some(cached.produced_at);
        if !force && produced_at <= self.last_delivered {
            return;
        }

        self.last_delivered = produced_at;
        metric!(counter("delivery") += 1, "task" => self.task.id());
        (self.callback)(&cached.value);
    }
}

impl<T, F> Subscription for Binding<T, F>
where
    T: Send + 'static,
    F: FnMut(&T),
{
    fn tick(&mut self, now: Tick) {
        self.task.advance(now);
        self.deliver(false);
    }

    fn force_update(&mut self) {
        self.deliver(true);
    }

    fn reset(&mut self) {
        self.last_delivered = None;
        self.task.reset();
    }
}

/// A set of subscriptions that is ticked together, typically once per frame.
pub struct Feed {
    timebase: Timebase,
    subscriptions: Vec<Box<dyn Subscription>>,
}

impl Feed {
    pub(crate) fn new(timebase: Timebase) -> Self {
        Self {
            timebase,
            subscriptions: Vec::new(),
        }
    }

    /// Calls `callback` with every new value of `task`.
    ///
    /// If the task already holds a value, `callback` receives it right away, without waiting
    /// for the next tick.
    pub fn subscribe<T, F>(&mut self, task: &RefreshTask<T>, callback: F)
    where
        T: Send + 'static,
        F: FnMut(&T) + 'static,
    {
        let mut binding = Binding {
            task: task.clone(),
            callback,
            last_delivered: None,
        };
        binding.deliver(false);
        self.subscriptions.push(Box::new(binding));
        self.report_size();
    }

    /// Advances every subscribed task to `now` and delivers values that are newer than what
    /// each subscription has seen.
    ///
    /// Subscriptions are visited in the order they were added. A task that is subscribed
    /// more than once is advanced more than once, which never starts a second computation.
    pub fn tick(&mut self, now: Tick) {
        for subscription in &mut self.subscriptions {
            subscription.tick(now);
        }
    }

    /// [`tick`](Self::tick)s at the current time of the fetcher's clock.
    pub fn tick_now(&mut self) {
        let now = self.timebase.now();
        self.tick(now);
    }

    /// Delivers the currently cached values again, whether they were seen before or not.
    ///
    /// Tasks are not advanced, so no computation is started.
    pub fn force_update(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.force_update();
        }
    }

    /// Forgets what every subscription has seen and resets every subscribed task.
    ///
    /// Tasks are shared: this also resets them for every other feed subscribed to them.
    pub fn reset(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.reset();
        }
    }

    /// Drops all subscriptions, leaving their tasks untouched.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.report_size();
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn report_size(&self) {
        metric!(gauge("feed.subscriptions") = self.subscriptions.len() as u64);
    }
}

impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("timebase", &self.timebase)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
