//! Helpers for testing refresh tasks and feeds.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - A [`Script`] is shared between the test and the producer closures it hands out, so keep
//!    the script around to inspect [`Script::calls`] after ticking.
//!
//!  - A [`Recorder`] is not `Send`. Callbacks run on the tick thread, which in tests is the
//!    test thread itself.
//!
//!  - When a producer has to block on a worker thread, use a [`Gate`] and make sure it is
//!    opened before the test ends, otherwise the worker stays parked forever.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::util::SubscriberInitExt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `fetcher_service` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("fetcher_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Runs `f` with a subscriber that captures all logs emitted on the current thread.
///
/// Returns the result of `f` and the captured logs as plain text, one event per line with
/// its fields formatted as `key=value`. Events from other threads are not captured.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = CapturedLogs::default();
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();

    let result = {
        let _guard = subscriber.set_default();
        f()
    };

    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, logs)
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A scripted producer.
///
/// Every invocation of a producer created by [`Script::producer`] pops the next step. Once
/// the script runs out, the last step is repeated.
#[derive(Debug)]
pub struct Script<T> {
    inner: Arc<ScriptInner<T>>,
}

#[derive(Debug)]
struct ScriptInner<T> {
    steps: Mutex<VecDeque<Result<T, String>>>,
    last: Mutex<Option<Result<T, String>>>,
    calls: AtomicUsize,
}

impl<T> Clone for Script<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Script<T> {
    /// Creates a script from a list of steps. `Err` steps fail with the given message.
    pub fn new(steps: impl IntoIterator<Item = Result<T, String>>) -> Self {
        Self {
            inner: Arc::new(ScriptInner {
                steps: Mutex::new(steps.into_iter().collect()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// A script that always succeeds with `value`.
    pub fn constant(value: T) -> Self {
        Self::new([Ok(value)])
    }

    /// Appends a step to the script.
    pub fn push(&self, step: Result<T, String>) {
        self.inner.steps.lock().unwrap().push_back(step);
    }

    /// How often any producer of this script has been invoked.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Creates a producer that plays this script.
    pub fn producer(&self) -> impl Fn() -> anyhow::Result<T> + Send + Sync + use<T> {
        let inner = Arc::clone(&self.inner);
        move || {
            inner.calls.fetch_add(1, Ordering::SeqCst);
            let next = inner.steps.lock().unwrap().pop_front();
            let step = {
                let mut last = inner.last.lock().unwrap();
                if let Some(next) = next {
                    *last = Some(next);
                }
                last.clone()
            };
            match step {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("empty script")),
            }
        }
    }
}

/// Records every value delivered to its callbacks.
#[derive(Debug)]
pub struct Recorder<T> {
    values: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            values: Rc::clone(&self.values),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            values: Rc::default(),
        }
    }
}

impl<T: Clone + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends every value it receives to this recorder.
    pub fn callback(&self) -> impl FnMut(&T) + use<T> {
        let values = Rc::clone(&self.values);
        move |value: &T| values.borrow_mut().push(value.clone())
    }

    /// All values recorded so far, in delivery order.
    pub fn values(&self) -> Vec<T> {
        self.values.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

/// A latch that producers can block on until the test opens it.
#[derive(Clone, Debug, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the gate is opened.
    pub fn wait(&self) {
        let (open, condvar) = &*self.inner;
        let mut open = open.lock().unwrap();
        while !*open {
            open = condvar.wait(open).unwrap();
        }
    }

    /// Opens the gate, releasing all current and future waiters.
    pub fn open(&self) {
        let (open, condvar) = &*self.inner;
        *open.lock().unwrap() = true;
        condvar.notify_all();
    }
}

/// Calls `f` until it returns `true`, panicking after `timeout`.
///
/// Use this to wait for computations that run on real worker threads.
#[track_caller]
pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !f() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
