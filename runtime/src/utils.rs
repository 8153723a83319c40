//! Task handles and cooperative yielding.

use crate::Error;
use futures::{
    channel::oneshot,
    future::poll_fn,
    stream::{AbortHandle, Abortable},
    FutureExt,
};
use prometheus_client::metrics::gauge::Gauge;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

/// Yield control back to the runtime.
///
/// The yielding task is placed at the back of the ready queue, so all work that is already ready
/// at the current logical time runs before it resumes.
pub async fn reschedule() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            return Poll::Ready(());
        }
        yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    })
    .await
}

/// Counts a task in the `tasks_running` gauge until it finishes or is aborted.
struct Running {
    gauge: Gauge,
    finished: AtomicBool,
}

impl Running {
    fn new(gauge: Gauge) -> Arc<Self> {
        gauge.inc();
        Arc::new(Self {
            gauge,
            finished: AtomicBool::new(false),
        })
    }

    fn finish(&self) {
        if !self.finished.swap(true, Ordering::Relaxed) {
            self.gauge.dec();
        }
    }
}

/// Handle to a spawned task.
///
/// Awaiting the handle yields the task's output, or [Error::Closed] if the task was aborted
/// before it finished. A task that panics takes the whole runtime down with it.
pub struct Handle<T>
where
    T: Send + 'static,
{
    aborter: AbortHandle,
    output: oneshot::Receiver<T>,
    running: Arc<Running>,
}

impl<T> Handle<T>
where
    T: Send + 'static,
{
    /// Wrap `f` into the future to run as a task and a handle observing it.
    pub(crate) fn init<F>(f: F, gauge: Gauge) -> (impl Future<Output = ()>, Self)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let running = Running::new(gauge);
        let (sender, output) = oneshot::channel();
        let (aborter, registration) = AbortHandle::new_pair();
        let task = {
            let running = running.clone();
            async move {
                let result = f.await;
                running.finish();
                let _ = sender.send(result);
            }
        };
        (
            Abortable::new(task, registration).map(|_| ()),
            Self {
                aborter,
                output,
                running,
            },
        )
    }

    /// Abort the task.
    ///
    /// The task will not be polled again and awaiting the handle returns [Error::Closed].
    pub fn abort(&self) {
        self.aborter.abort();
        self.running.finish();
    }
}

impl<T> Future for Handle<T>
where
    T: Send + 'static,
{
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.output.poll_unpin(cx).map_err(|_| Error::Closed)
    }
}
