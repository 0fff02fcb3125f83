//! Engine scheduling boundary.
//!
//! A single worker thread draining an unbounded channel. Tasks run in the
//! order they were scheduled, which is what the context-switched reliable
//! input relies on to keep delivery order intact across the thread hop.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send>;

struct SchedulerInner {
    sender: Sender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the engine's scheduling boundary. Cheap to clone.
///
/// Dropping the last handle disconnects the channel; the worker drains any
/// remaining tasks and exits.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Spawn the worker thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Task>();

        let worker = std::thread::Builder::new()
            .name("rivulet-scheduler".to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .expect("failed to spawn scheduler thread");

        Scheduler {
            inner: Arc::new(SchedulerInner {
                sender,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Queue a task for execution on the worker thread.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        if self.inner.sender.send(Box::new(task)).is_err() {
            tracing::warn!("task scheduled after scheduler shutdown, dropping");
        }
    }

    /// Block until every task scheduled before this call has run.
    pub fn flush(&self) {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.schedule(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        // Replace the live sender with a disconnected one so the worker's
        // recv loop ends once the queue is drained.
        let (dead, _) = unbounded::<Task>();
        self.sender = dead;
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
