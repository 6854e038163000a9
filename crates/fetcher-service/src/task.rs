//! The refresh task state machine.
//!
//! A [`RefreshTask`] owns a producer function and caches the value of its last successful
//! invocation. It does nothing on its own: every call to [`RefreshTask::advance`] first
//! consumes a finished computation, if there is one, and then starts a new one if the task
//! is idle and its [`RefreshPolicy`] says it is due.
//!
//! ```text
//!            now >= next_eligible
//!   ┌──────┐ ─────────────────────────► ┌───────────┐
//!   │ Idle │                            │ Computing │
//!   └──────┘ ◄───────────────────────── └───────────┘
//!            outcome consumed,
//!            next_eligible = completed_at + period × cycles
//! ```
//!
//! Tasks are cheap handles to shared, single-threaded state. Cloning a task does not create
//! a new cache, which is how several [`Feed`](crate::feed::Feed)s observe the same task.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::{Tick, Timebase};
use crate::executor::{Executor, Pending, Producer, spawn_computation};
use crate::policy::RefreshPolicy;

/// The result of a single producer invocation.
#[derive(Debug)]
pub enum Outcome<T> {
    Success { value: T, completed_at: Tick },
    Failure { error: anyhow::Error, completed_at: Tick },
}

impl<T> Outcome<T> {
    pub fn completed_at(&self) -> Tick {
        match self {
            Self::Success { completed_at, .. } | Self::Failure { completed_at, .. } => {
                *completed_at
            }
        }
    }
}

/// A successfully computed value together with the tick its computation completed at.
#[derive(Debug, PartialEq, Eq)]
pub struct CachedValue<T> {
    pub value: T,
    pub produced_at: Tick,
}

/// A snapshot of a task's scheduling state, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub computing: bool,
    pub cached_at: Option<Tick>,
    pub next_eligible: Tick,
}

/// A periodically recomputed, cached value.
///
/// Created by [`Fetcher::create_task`](crate::fetcher::Fetcher::create_task).
pub struct RefreshTask<T> {
    inner: Rc<TaskInner<T>>,
}

struct TaskInner<T> {
    id: Arc<str>,
    producer: Producer<T>,
    /// The period in ticks, always at least one.
    period: Tick,
    policy: Box<dyn RefreshPolicy>,
    executor: Arc<dyn Executor>,
    timebase: Timebase,
    state: RefCell<TaskState<T>>,
}

struct TaskState<T> {
    /// The in-flight computation. `Some` means the task is computing.
    pending: Option<Pending<T>>,
    cached: Option<Rc<CachedValue<T>>>,
    /// A new computation may start at or after this tick.
    next_eligible: Tick,
}

impl<T> Default for TaskState<T> {
    fn default() -> Self {
        Self {
            pending: None,
            cached: None,
            next_eligible: 0,
        }
    }
}

impl<T> Clone for RefreshTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> RefreshTask<T> {
    pub(crate) fn new(
        id: Arc<str>,
        producer: Producer<T>,
        period: Tick,
        policy: Box<dyn RefreshPolicy>,
        executor: Arc<dyn Executor>,
        timebase: Timebase,
    ) -> Self {
        debug_assert!(period > 0, "period was validated by the fetcher");
        Self {
            inner: Rc::new(TaskInner {
                id,
                producer,
                period,
                policy,
                executor,
                timebase,
                state: RefCell::default(),
            }),
        }
    }

    /// Moves the task forward to `now`.
    ///
    /// This never blocks. A computation that has finished is consumed first, so a task whose
    /// next computation is already due starts it within the same call.
    pub fn advance(&self, now: Tick) {
        let mut state = self.state();

        if let Some(pending) = state.pending.as_mut() {
            let Some(outcome) = pending.poll_if_done() else {
                // still computing, there can only be one computation at a time
                return;
            };
            state.pending = None;
            self.consume(&mut state, outcome);
        }

        if now >= state.next_eligible {
            tracing::trace!(task = %self.inner.id, now, "Starting computation");
            metric!(counter("computation.started") += 1, "task" => &self.inner.id);
            state.pending = Some(spawn_computation(
                self.inner.executor.as_ref(),
                &self.inner.timebase,
                Arc::clone(&self.inner.id),
                Arc::clone(&self.inner.producer),
            ));
        }
    }

    fn consume(&self, state: &mut TaskState<T>, outcome: Outcome<T>) {
        let id = &self.inner.id;
        let completed_at = outcome.completed_at();
        let cycles = match outcome {
            Outcome::Success { value, .. } => {
                tracing::trace!(task = %id, completed_at, "Computation succeeded");
                metric!(
                    counter("computation.finished") += 1,
                    "task" => id,
                    "status" => "success",
                );
                state.cached = Some(Rc::new(CachedValue {
                    value,
                    produced_at: completed_at,
                }));
                self.inner.policy.cycles_after_success().get()
            }
            Outcome::Failure { error, .. } => {
                let cycles = self.inner.policy.cycles_after_failure().get();
                tracing::warn!(
                    task = %id,
                    error = &*error as &dyn std::error::Error,
                    retry_in_cycles = cycles,
                    has_stale_value = state.cached.is_some(),
                    "Refresh failed",
                );
                metric!(
                    counter("computation.finished") += 1,
                    "task" => id,
                    "status" => "failure",
                );
                cycles
            }
        };
        state.next_eligible = self.after_cycles(completed_at, cycles);
    }
}

impl<T> RefreshTask<T> {
    /// Forgets all state: the cached value, the schedule and any in-flight computation.
    ///
    /// An in-flight computation is abandoned, not cancelled. It keeps running on its
    /// executor and its outcome is thrown away. The task is immediately eligible again, so
    /// the next [`advance`](Self::advance) starts a fresh computation.
    pub fn reset(&self) {
        let mut state = self.state();
        if state.pending.is_some() {
            tracing::debug!(task = %self.inner.id, "Abandoning in-flight computation");
            metric!(counter("computation.abandoned") += 1, "task" => &self.inner.id);
        }
        *state = TaskState::default();
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The refresh period, in ticks.
    pub fn period(&self) -> Tick {
        self.inner.period
    }

    pub fn is_computing(&self) -> bool {
        self.state().pending.is_some()
    }

    /// The last successfully computed value, if any.
    pub fn cached(&self) -> Option<Rc<CachedValue<T>>> {
        self.state().cached.clone()
    }

    /// The tick at or after which the next computation may start.
    pub fn next_eligible(&self) -> Tick {
        self.state().next_eligible
    }

    pub fn status(&self) -> TaskStatus {
        let state = self.state();
        TaskStatus {
            id: self.inner.id.to_string(),
            computing: state.pending.is_some(),
            cached_at: state.cached.as_ref().map(|cached| cached.produced_at),
            next_eligible: state.next_eligible,
        }
    }

    /// Whether both handles refer to the same task.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn after_cycles(&self, completed_at: Tick, cycles: u32) -> Tick {
        let wait = self.inner.period.saturating_mul(Tick::from(cycles));
        completed_at.saturating_add(wait)
    }

    fn state(&self) -> RefMut<'_, TaskState<T>> {
        self.inner.state.borrow_mut()
    }
}

impl<T> fmt::Debug for RefreshTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.try_borrow();
        let mut s = f.debug_struct("RefreshTask");
        s.field("id", &self.inner.id).field("period", &self.inner.period);
        if let Ok(state) = state {
            s.field("computing", &state.pending.is_some())
                .field("cached_at", &state.cached.as_ref().map(|c| c.produced_at))
                .field("next_eligible", &state.next_eligible);
        }
        s.finish()
    }
}
