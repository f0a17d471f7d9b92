//! Single-worker execution context
//!
//! An [`EventBase`] owns one named OS thread running a current-thread tokio
//! runtime. Closures submitted with [`EventBase::run_in_event_base`] run one
//! at a time in submission order; futures submitted with
//! [`EventBase::spawn`] (entry timers) interleave with them on the same
//! thread. Neighbor entries are only ever ticked and destroyed here.

use crate::error::{NeighCacheError, Result};
use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::ThreadId;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the result of a task scheduled on an [`EventBase`].
///
/// Resolves once the task has run. Can be awaited or waited on from a
/// thread that is not the event base's own.
#[must_use = "a CompletionHandle does nothing unless waited on"]
pub struct CompletionHandle<T> {
    evb: String,
    rx: oneshot::Receiver<std::result::Result<T, String>>,
}

impl<T> CompletionHandle<T> {
    fn ready(evb: &str, result: std::result::Result<T, String>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            evb: evb.to_string(),
            rx,
        }
    }

    /// Blocks the calling thread until the task completes.
    ///
    /// Must not be called from the event base thread that runs the task.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(message))) => Poll::Ready(Err(NeighCacheError::TaskPanicked {
                evb: this.evb.clone(),
                message,
            })),
            Poll::Ready(Err(_)) => Poll::Ready(Err(NeighCacheError::TaskCanceled(this.evb.clone()))),
        }
    }
}

/// Dedicated single-threaded execution context.
pub struct EventBase {
    name: String,
    tasks: mpsc::UnboundedSender<Task>,
    handle: Handle,
    thread_id: ThreadId,
    shutdown: CancellationToken,
    thread: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl EventBase {
    /// Starts a new event base thread named `name`.
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();

        let (tx, rx) = mpsc::unbounded_channel::<Task>();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let thread_name = name.clone();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(run_loop(rx, token));
                debug!(evb = %thread_name, "Event base loop exited");
            })?;

        debug!(evb = %name, "Started event base");
        Ok(Arc::new(Self {
            name,
            tasks: tx,
            handle,
            thread_id: thread.thread().id(),
            shutdown,
            thread: parking_lot::Mutex::new(Some(thread)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the caller is running on this event base's thread.
    pub fn in_event_base_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Schedules `f` to run on the event base thread after all previously
    /// scheduled closures.
    pub fn run_in_event_base<T, F>(&self, f: F) -> CompletionHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            let _ = tx.send(catch_unwind(AssertUnwindSafe(f)).map_err(panic_message));
        });
        if self.tasks.send(task).is_err() {
            // The closure (and its sender) is dropped, which cancels the handle.
            warn!(evb = %self.name, "Event base stopped, dropping task");
        }
        CompletionHandle {
            evb: self.name.clone(),
            rx,
        }
    }

    /// Runs `f` inline when already on the event base thread, otherwise
    /// schedules it like [`EventBase::run_in_event_base`].
    pub fn run_immediately_or_in_event_base<T, F>(&self, f: F) -> CompletionHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.in_event_base_thread() {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            CompletionHandle::ready(&self.name, result)
        } else {
            self.run_in_event_base(f)
        }
    }

    /// Spawns a future onto the event base runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Drop for EventBase {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if self.in_event_base_thread() {
            // Last reference released by one of our own tasks; the loop
            // exits on its own once that task returns.
            return;
        }
        if thread.join().is_err() {
            error!(evb = %self.name, "Event base thread panicked");
        }
    }
}

async fn run_loop(mut tasks: mpsc::UnboundedReceiver<Task>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            task = tasks.recv() => match task {
                Some(task) => task(),
                None => break,
            },
        }
    }

    // Run whatever was queued before shutdown so pending completion handles
    // resolve instead of being canceled.
    tasks.close();
    while let Ok(task) = tasks.try_recv() {
        task();
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
