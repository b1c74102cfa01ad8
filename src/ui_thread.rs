use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use tokio::sync::{mpsc, oneshot};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("UI thread is no longer running")]
pub struct UiThreadGone;

/// Dedicated thread that owns every UI-affine radio call.
///
/// Work is submitted as closures and runs strictly in submission order. The
/// thread exits once the handle is dropped and the queue has drained.
pub struct UiThread {
    tx: mpsc::UnboundedSender<Task>,
    submitted: AtomicU64,
}

impl UiThread {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        std::thread::Builder::new()
            .name("nfc-ui".to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
                debug!("UI thread exiting");
            })?;
        Ok(UiThread {
            tx,
            submitted: AtomicU64::new(0),
        })
    }

    /// Queues `task` and returns without waiting for it.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<(), UiThreadGone> {
        let n = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Submitting UI task #{}", n);
        self.tx.send(Box::new(task)).map_err(|_| UiThreadGone)
    }

    /// Runs `f` on the UI thread and waits for its result.
    pub async fn run<T>(&self, f: impl FnOnce() -> T + Send + 'static) -> Result<T, UiThreadGone>
    where
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(move || {
            let _ = done_tx.send(f());
        })?;
        done_rx.await.map_err(|_| UiThreadGone)
    }

    /// Number of tasks submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }
}
