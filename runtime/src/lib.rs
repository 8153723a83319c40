//! Execute simulated quantum network tasks over a deterministic logical clock.
//!
//! This crate provides the event clock that drives every simulation: a single global,
//! monotonically increasing logical time axis onto which tasks and callbacks are scheduled.
//! Time is never related to the wall clock. It only moves forward when no work is ready
//! to run, at which point it jumps straight to the earliest scheduled alarm.
//!
//! # Terminology
//!
//! Each runtime is composed of a `Runner` and a `Context`. The `Runner` drives execution of the
//! runtime. The `Context` implements any number of the other traits ([Spawner], [Clock],
//! [Metrics]) to provide core functionality to tasks.
//!
//! # Ordering
//!
//! Execution is single-threaded and cooperative. Only one task or callback runs at any instant and
//! none can be preempted. Work scheduled for the same logical time runs in the order it was
//! scheduled (FIFO tie-break).

use prometheus_client::registry::Metric;
use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use thiserror::Error;

#[macro_use]
mod macros;

pub mod deterministic;
mod utils;
pub use utils::*;

#[doc(hidden)]
pub use futures;

/// Prefix for runtime metrics.
const METRICS_PREFIX: &str = "runtime";

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("closed")]
    Closed,
}

/// Interface that any task scheduler must implement to start
/// running tasks.
pub trait Runner {
    /// Context defines the environment available to tasks.
    type Context;

    /// Start running a root task.
    ///
    /// When this function returns, all spawned tasks are abandoned.
    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future;
}

/// Interface that any task scheduler must implement to spawn tasks.
pub trait Spawner: Clone + Send + Sync + 'static {
    /// Enqueue a task to be executed.
    ///
    /// Label can be used to track how many instances of a specific type of
    /// task have been spawned or are running concurrently (and is prefixed by all
    /// parent labels).
    ///
    /// # Warning
    ///
    /// If this function is used to spawn multiple tasks from the same context, the runtime will panic
    /// to prevent accidental misuse.
    fn spawn<F, Fut, T>(self, f: F) -> Handle<T>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static;

    /// Enqueue a task to be executed (without consuming the context).
    ///
    /// Some actors need to spawn a task with `self` as an argument. `spawn_ref` is
    /// used to prevent the context from being consumed before the task is spawned.
    ///
    /// # Warning
    ///
    /// If this function is used to spawn multiple tasks from the same context,
    /// the runtime will panic to prevent accidental misuse.
    fn spawn_ref<F, T>(&mut self) -> impl FnOnce(F) -> Handle<T> + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

/// Interface to register and encode metrics.
pub trait Metrics: Clone + Send + Sync + 'static {
    /// Get the current label of the context.
    fn label(&self) -> String;

    /// Create a new instance of `Metrics` with the given label appended to the end
    /// of the current `Metrics` label.
    ///
    /// This is commonly used to create a nested context for `register`.
    ///
    /// It is not permitted for any implementation to use `METRICS_PREFIX` as the start of a
    /// label (reserved for metrics for the runtime).
    fn with_label(&self, label: &str) -> Self;

    /// Register a metric with the runtime.
    ///
    /// Any registered metric will include (as a prefix) the label of the current context.
    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric);

    /// Encode all metrics into a buffer.
    fn encode(&self) -> String;
}

/// Interface that any task scheduler must implement to provide
/// time-based operations.
///
/// It is necessary to mock time to provide deterministic execution
/// of arbitrary tasks.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn current(&self) -> SystemTime;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static;

    /// Sleep until the given deadline.
    fn sleep_until(&self, deadline: SystemTime) -> impl Future<Output = ()> + Send + 'static;

    /// Invoke `callback` once the clock reaches `deadline`.
    ///
    /// Callbacks registered for the same time fire in the order they were registered. The
    /// returned [Alarm] can be used to withdraw the callback before it fires.
    fn call_at<F>(&self, deadline: SystemTime, callback: F) -> Alarm
    where
        F: FnOnce() + Send + 'static;
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a callback registered with [Clock::call_at].
///
/// Firing a cancelled alarm is a no-op.
#[derive(Clone)]
pub struct Alarm {
    callback: Arc<Mutex<Option<Callback>>>,
}

impl Alarm {
    pub(crate) fn new(callback: Callback) -> Self {
        Self {
            callback: Arc::new(Mutex::new(Some(callback))),
        }
    }

    /// Withdraw the callback.
    ///
    /// Returns `true` if the callback had not yet fired (or been cancelled).
    pub fn cancel(&self) -> bool {
        self.callback.lock().unwrap().take().is_some()
    }

    /// Returns `true` if the callback has neither fired nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    /// Run the callback (if still pending).
    pub(crate) fn fire(&self) -> bool {
        let callback = self.callback.lock().unwrap().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}
