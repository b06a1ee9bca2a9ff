use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs GPU work on one dedicated render thread, in submission order.
///
/// A job that panics is logged and skipped; the thread keeps serving the
/// jobs behind it. Dropping the queue detaches the thread; jobs already
/// queued still run.
#[derive(Debug)]
pub struct RenderQueue {
    tx: mpsc::UnboundedSender<Job>,
    thread: Option<JoinHandle<()>>,
}

impl RenderQueue {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                        log::error!("render job panicked: {}", panic_message(panic.as_ref()));
                    }
                }
                log::debug!("render queue drained, thread exiting");
            })?;

        Ok(Self { tx, thread: Some(thread) })
    }

    /// Queues `f` without waiting for it.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(f)).is_err() {
            log::warn!("render queue closed, dropping job");
        }
    }

    /// Queues `f` on the render thread. Resolves to `None` if the queue
    /// has shut down or this job panicked. Later jobs are unaffected.
    pub fn run<R, F>(&self, f: F) -> impl Future<Output = Option<R>> + Send + 'static
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        if self.tx.send(job).is_err() {
            log::warn!("render queue closed, dropping job");
        }

        async move { reply_rx.await.ok() }
    }

    pub fn is_render_thread(&self) -> bool {
        self.thread.as_ref().map(|t| t.thread().id()) == Some(std::thread::current().id())
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
