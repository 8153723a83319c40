//! A deterministic runtime that executes tasks in FIFO order over simulated time.
//!
//! All work (spawned tasks, woken sleepers and [Alarm] callbacks) is placed on a single ready
//! queue and executed one item at a time. When the ready queue drains, simulated time jumps
//! directly to the earliest pending alarm. Alarms are ordered by `(time, registration order)`, so
//! work scheduled for the same logical time runs in the order it was scheduled.
//!
//! Randomness is drawn from a seeded generator owned by the runtime, so two runs with the same
//! seed produce identical executions (which can be verified with the [Auditor]).
//!
//! # Panics
//!
//! If any task panics, the runtime will panic (and shutdown). If the root task cannot make
//! progress and nothing is scheduled, the runtime panics with `runtime stalled`.
//!
//! # Example
//!
//! ```rust
//! use qnet_runtime::{deterministic, Clock, Metrics, Runner, Spawner};
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let child = context.with_label("child").spawn(|context| async move {
//!         context.sleep(Duration::from_nanos(5)).await;
//!         "hello"
//!     });
//!     assert_eq!(child.await.unwrap(), "hello");
//!     assert_eq!(context.current(), UNIX_EPOCH + Duration::from_nanos(5));
//! });
//! ```

use crate::{Alarm, Clock, Handle, METRICS_PREFIX};
use futures::task::{waker_ref, ArcWake};
use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::{Metric, Registry},
};
use qnet_utils::{hex, SystemTimeExt};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{self, Poll, Waker},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::trace;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Work {
    label: String,
}

#[derive(Debug)]
struct Metrics {
    tasks_spawned: Family<Work, Counter>,
    tasks_running: Family<Work, Gauge>,
    task_polls: Family<Work, Counter>,
    alarms_fired: Counter,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            task_polls: Family::default(),
            tasks_spawned: Family::default(),
            tasks_running: Family::default(),
            alarms_fired: Counter::default(),
        };
        registry.register(
            "tasks_spawned",
            "Total number of tasks spawned",
            metrics.tasks_spawned.clone(),
        );
        registry.register(
            "tasks_running",
            "Number of tasks currently running",
            metrics.tasks_running.clone(),
        );
        registry.register(
            "task_polls",
            "Total number of task polls",
            metrics.task_polls.clone(),
        );
        registry.register(
            "alarms_fired",
            "Total number of alarm callbacks fired",
            metrics.alarms_fired.clone(),
        );
        metrics
    }
}

/// Track the state of the runtime for determinism auditing.
pub struct Auditor {
    hash: Mutex<Vec<u8>>,
}

impl Default for Auditor {
    fn default() -> Self {
        Self {
            hash: Vec::new().into(),
        }
    }
}

impl Auditor {
    fn record(&self, event: &[u8], update: impl FnOnce(&mut Sha256)) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(event);
        update(&mut hasher);
        *hash = hasher.finalize().to_vec();
    }

    fn process_task(&self, task: u128, label: &str) {
        self.record(b"process_task", |hasher| {
            hasher.update(task.to_be_bytes());
            hasher.update(label.as_bytes());
        });
    }

    fn fire_alarm(&self, time: SystemTime, sequence: u64) {
        self.record(b"fire_alarm", |hasher| {
            hasher.update(time.epoch_nanos().to_be_bytes());
            hasher.update(sequence.to_be_bytes());
        });
    }

    fn rand(&self, method: &str) {
        self.record(b"rand", |hasher| {
            hasher.update(method.as_bytes());
        });
    }

    fn register(&self, name: &str, help: &str) {
        self.record(b"register", |hasher| {
            hasher.update(name.as_bytes());
            hasher.update(help.as_bytes());
        });
    }

    fn encode(&self) {
        self.record(b"encode", |_| {});
    }

    /// Generate a representation of the current state of the runtime.
    ///
    /// This can be used to ensure that logic running on top
    /// of the runtime is interacting deterministically.
    pub fn state(&self) -> String {
        let hash = self.hash.lock().unwrap().clone();
        hex(&hash)
    }
}

struct Task {
    id: u128,
    label: String,

    tasks: Arc<Tasks>,

    future: Mutex<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>,

    queued: Mutex<bool>,
    completed: Mutex<bool>,
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.tasks.wake(arc_self);
    }
}

/// A work item in the ready queue.
enum WorkItem {
    Root,
    Task(Arc<Task>),
    Alarm {
        time: SystemTime,
        sequence: u64,
        alarm: Alarm,
    },
}

struct Tasks {
    counter: Mutex<u128>,
    ready: Mutex<VecDeque<WorkItem>>,
}

impl Tasks {
    fn register(
        arc_self: &Arc<Self>,
        label: &str,
        future: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) {
        let id = {
            let mut l = arc_self.counter.lock().unwrap();
            let old = *l;
            *l = l.checked_add(1).expect("task counter overflow");
            old
        };
        let task = Arc::new(Task {
            id,
            label: label.to_string(),
            future: Mutex::new(future),
            tasks: arc_self.clone(),
            queued: Mutex::new(true),
            completed: Mutex::new(false),
        });
        arc_self.push(WorkItem::Task(task));
    }

    /// Place a task at the back of the ready queue (unless it is already queued or complete).
    fn wake(&self, task: &Arc<Task>) {
        if *task.completed.lock().unwrap() {
            return;
        }
        let mut queued = task.queued.lock().unwrap();
        if *queued {
            return;
        }
        *queued = true;
        self.push(WorkItem::Task(task.clone()));
    }

    fn push(&self, item: WorkItem) {
        self.ready.lock().unwrap().push_back(item);
    }

    fn pop(&self) -> Option<WorkItem> {
        self.ready.lock().unwrap().pop_front()
    }
}

/// Waker for the *root* future.
///
/// The root future isn't stored inside `Tasks`, so it is tracked with its own queued flag.
struct RootWaker {
    tasks: Arc<Tasks>,
    queued: Mutex<bool>,
}

impl ArcWake for RootWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut queued = arc_self.queued.lock().unwrap();
        if *queued {
            return;
        }
        *queued = true;
        arc_self.tasks.push(WorkItem::Root);
    }
}

/// Something to do once the clock reaches a given time.
enum Action {
    Wake(Waker),
    Call(Alarm),
}

struct Entry {
    time: SystemTime,
    sequence: u64,
    action: Action,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap (earliest time, then earliest registration)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct Alarms {
    heap: BinaryHeap<Entry>,
    next: u64,
}

/// Configuration for the `deterministic` runtime.
#[derive(Clone)]
pub struct Config {
    /// Seed for the random number generator.
    pub seed: u64,

    /// If the runtime is still executing at this point (i.e. a test hasn't stopped), panic.
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 42,
            timeout: None,
        }
    }
}

/// Deterministic runtime that executes tasks in FIFO order.
struct Executor {
    registry: Mutex<Registry>,
    deadline: Option<SystemTime>,
    metrics: Arc<Metrics>,
    auditor: Arc<Auditor>,
    rng: Mutex<StdRng>,
    time: Mutex<SystemTime>,
    tasks: Arc<Tasks>,
    alarms: Mutex<Alarms>,
}

impl Executor {
    fn schedule(&self, time: SystemTime, action: Action) -> u64 {
        let mut alarms = self.alarms.lock().unwrap();
        let sequence = alarms.next;
        alarms.next = alarms.next.checked_add(1).expect("alarm counter overflow");
        alarms.heap.push(Entry {
            time,
            sequence,
            action,
        });
        sequence
    }

    fn current(&self) -> SystemTime {
        *self.time.lock().unwrap()
    }
}

/// Implementation of [`crate::Runner`] for the `deterministic` runtime.
pub struct Runner {
    executor: Arc<Executor>,
}

impl Runner {
    /// Initialize a new `deterministic` runtime with the given configuration.
    pub fn new(cfg: Config) -> Self {
        let mut registry = Registry::default();
        let runtime_registry = registry.sub_registry_with_prefix(METRICS_PREFIX);
        let metrics = Arc::new(Metrics::init(runtime_registry));
        let start_time = UNIX_EPOCH;
        let deadline = cfg
            .timeout
            .map(|timeout| start_time.checked_add(timeout).expect("timeout overflowed"));
        let executor = Arc::new(Executor {
            registry: Mutex::new(registry),
            deadline,
            metrics,
            auditor: Arc::new(Auditor::default()),
            rng: Mutex::new(StdRng::seed_from_u64(cfg.seed)),
            time: Mutex::new(start_time),
            tasks: Arc::new(Tasks {
                counter: Mutex::new(1), // Reserve 0 for the root task
                ready: Mutex::new(VecDeque::new()),
            }),
            alarms: Mutex::new(Alarms::default()),
        });
        Self { executor }
    }

    /// Initialize a new `deterministic` runtime with the default configuration
    /// and the provided seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(Config {
            seed,
            ..Config::default()
        })
    }

    /// Initialize a new `deterministic` runtime with the default configuration
    /// but exit after the given timeout.
    pub fn timed(timeout: Duration) -> Self {
        Self::new(Config {
            timeout: Some(timeout),
            ..Config::default()
        })
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl crate::Runner for Runner {
    type Context = Context;

    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future,
    {
        let executor = self.executor;
        let context = Context {
            label: String::new(),
            spawned: false,
            executor: executor.clone(),
        };

        // Pin root task to the heap
        let mut root = Box::pin(f(context));
        let root_waker = Arc::new(RootWaker {
            tasks: executor.tasks.clone(),
            queued: Mutex::new(true),
        });
        executor.tasks.push(WorkItem::Root);

        // Process work until root task completes or progress stalls
        let mut iter: u64 = 0;
        loop {
            // Run everything that is ready at the current time (in FIFO order)
            trace!(iter, "starting loop");
            while let Some(item) = executor.tasks.pop() {
                match item {
                    WorkItem::Root => {
                        *root_waker.queued.lock().unwrap() = false;

                        // Record task for auditing
                        executor.auditor.process_task(0, ""); // 0 is reserved for the root task
                        trace!(id = 0, "processing task");

                        // Prepare task for polling
                        let waker = waker_ref(&root_waker);
                        let mut cx = task::Context::from_waker(&waker);
                        executor
                            .metrics
                            .task_polls
                            .get_or_create(&Work {
                                label: String::new(),
                            })
                            .inc();
                        if let Poll::Ready(output) = root.as_mut().poll(&mut cx) {
                            trace!(id = 0, "task is complete");
                            return output;
                        }
                        trace!(id = 0, "task is still pending");
                    }
                    WorkItem::Task(task) => {
                        // If task is completed, skip it
                        if *task.completed.lock().unwrap() {
                            continue;
                        }
                        *task.queued.lock().unwrap() = false;

                        // Record task for auditing
                        executor.auditor.process_task(task.id, &task.label);
                        trace!(id = task.id, "processing task");

                        // Prepare task for polling
                        let waker = waker_ref(&task);
                        let mut cx = task::Context::from_waker(&waker);
                        executor
                            .metrics
                            .task_polls
                            .get_or_create(&Work {
                                label: task.label.clone(),
                            })
                            .inc();
                        let pending = {
                            let mut future = task.future.lock().unwrap();
                            future.as_mut().poll(&mut cx).is_pending()
                        };
                        if pending {
                            trace!(id = task.id, "task is still pending");
                            continue;
                        }

                        // Mark task as completed (dropping whatever its future still holds)
                        *task.completed.lock().unwrap() = true;
                        *task.future.lock().unwrap() = Box::pin(async {});
                        trace!(id = task.id, "task is complete");
                    }
                    WorkItem::Alarm {
                        time,
                        sequence,
                        alarm,
                    } => {
                        if alarm.fire() {
                            executor.auditor.fire_alarm(time, sequence);
                            executor.metrics.alarms_fired.inc();
                            trace!(sequence, "alarm fired");
                        }
                    }
                }
            }

            // Nothing is ready, so jump to the next alarm
            let next = executor
                .alarms
                .lock()
                .unwrap()
                .heap
                .peek()
                .map(|entry| entry.time);
            let Some(next) = next else {
                panic!("runtime stalled");
            };
            let current = {
                let mut time = executor.time.lock().unwrap();
                if next > *time {
                    *time = next;
                }
                *time
            };
            if let Some(deadline) = executor.deadline {
                if current >= deadline {
                    panic!("runtime timeout");
                }
            }
            trace!(now = current.epoch_nanos(), "time advanced");

            // Collect everything that is due (in order)
            let due = {
                let mut alarms = executor.alarms.lock().unwrap();
                let mut due = Vec::new();
                while alarms
                    .heap
                    .peek()
                    .is_some_and(|entry| entry.time <= current)
                {
                    if let Some(entry) = alarms.heap.pop() {
                        due.push(entry);
                    }
                }
                due
            };
            for entry in due {
                match entry.action {
                    Action::Wake(waker) => waker.wake(),
                    Action::Call(alarm) => executor.tasks.push(WorkItem::Alarm {
                        time: entry.time,
                        sequence: entry.sequence,
                        alarm,
                    }),
                }
            }
            iter += 1;
        }
    }
}

/// Implementation of [`crate::Spawner`], [`crate::Clock`] and [`crate::Metrics`] for the
/// `deterministic` runtime.
pub struct Context {
    label: String,
    spawned: bool,
    executor: Arc<Executor>,
}

impl Context {
    /// Get the [Auditor] tracking the state of the runtime.
    pub fn auditor(&self) -> Arc<Auditor> {
        self.executor.auditor.clone()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            spawned: false,
            executor: self.executor.clone(),
        }
    }
}

impl crate::Spawner for Context {
    fn spawn<F, Fut, T>(self, f: F) -> Handle<T>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        // Ensure a context only spawns one task
        assert!(!self.spawned, "already spawned");

        // Get metrics
        let label = self.label.clone();
        let work = Work {
            label: label.clone(),
        };
        self.executor
            .metrics
            .tasks_spawned
            .get_or_create(&work)
            .inc();
        let gauge = self
            .executor
            .metrics
            .tasks_running
            .get_or_create(&work)
            .clone();

        // Set up the task
        let executor = self.executor.clone();
        let future = f(self);
        let (f, handle) = Handle::init(future, gauge);

        // Spawn the task
        Tasks::register(&executor.tasks, &label, Box::pin(f));
        handle
    }

    fn spawn_ref<F, T>(&mut self) -> impl FnOnce(F) -> Handle<T> + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        // Ensure a context only spawns one task
        assert!(!self.spawned, "already spawned");
        self.spawned = true;

        // Get metrics
        let work = Work {
            label: self.label.clone(),
        };
        self.executor
            .metrics
            .tasks_spawned
            .get_or_create(&work)
            .inc();
        let gauge = self
            .executor
            .metrics
            .tasks_running
            .get_or_create(&work)
            .clone();

        // Set up the task
        let label = self.label.clone();
        let executor = self.executor.clone();
        move |f: F| {
            let (f, handle) = Handle::init(f, gauge);

            // Spawn the task
            Tasks::register(&executor.tasks, &label, Box::pin(f));
            handle
        }
    }
}

impl crate::Metrics for Context {
    fn with_label(&self, label: &str) -> Self {
        let label = {
            let prefix = self.label.clone();
            if prefix.is_empty() {
                label.to_string()
            } else {
                format!("{}_{}", prefix, label)
            }
        };
        assert!(
            !label.starts_with(METRICS_PREFIX),
            "using runtime label is not allowed"
        );
        Self {
            label,
            spawned: false,
            executor: self.executor.clone(),
        }
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric) {
        // Prepare args
        let name = name.into();
        let help = help.into();

        // Register metric
        self.executor.auditor.register(&name, &help);
        let prefixed_name = {
            let prefix = &self.label;
            if prefix.is_empty() {
                name
            } else {
                format!("{}_{}", *prefix, name)
            }
        };
        self.executor
            .registry
            .lock()
            .unwrap()
            .register(prefixed_name, help, metric)
    }

    fn encode(&self) -> String {
        self.executor.auditor.encode();
        let mut buffer = String::new();
        encode(&mut buffer, &self.executor.registry.lock().unwrap()).expect("encoding failed");
        buffer
    }
}

struct Sleeper {
    executor: Arc<Executor>,
    time: SystemTime,
    registered: bool,
}

impl Future for Sleeper {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        if self.executor.current() >= self.time {
            return Poll::Ready(());
        }
        if !self.registered {
            self.registered = true;
            self.executor
                .schedule(self.time, Action::Wake(cx.waker().clone()));
        }
        Poll::Pending
    }
}

impl Clock for Context {
    fn current(&self) -> SystemTime {
        self.executor.current()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self
            .current()
            .checked_add(duration)
            .expect("overflow when setting wake time");
        self.sleep_until(deadline)
    }

    fn sleep_until(&self, deadline: SystemTime) -> impl Future<Output = ()> + Send + 'static {
        Sleeper {
            executor: self.executor.clone(),

            time: deadline,
            registered: false,
        }
    }

    fn call_at<F>(&self, deadline: SystemTime, callback: F) -> Alarm
    where
        F: FnOnce() + Send + 'static,
    {
        let alarm = Alarm::new(Box::new(callback));
        self.executor.schedule(deadline, Action::Call(alarm.clone()));
        alarm
    }
}

impl RngCore for Context {
    fn next_u32(&mut self) -> u32 {
        self.executor.auditor.rand("next_u32");
        self.executor.rng.lock().unwrap().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.executor.auditor.rand("next_u64");
        self.executor.rng.lock().unwrap().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.executor.auditor.rand("fill_bytes");
        self.executor.rng.lock().unwrap().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.executor.auditor.rand("try_fill_bytes");
        self.executor.rng.lock().unwrap().try_fill_bytes(dest)
    }
}
