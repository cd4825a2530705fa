use crate::resources::manager::PendingOperation;
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

#[derive(Default)]
struct QueueState {
    operations: VecDeque<PendingOperation>,
    busy: bool,
    stopped: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<QueueState>,
    work_available: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().expect("Loading queue lock")
    }
}

/// A single worker thread draining a FIFO of pending tier transitions.
///
/// Operations are processed strictly in submission order, so two operations on the same resource
/// never overtake each other. The next phase of a split transition goes to `handoff` before the
/// thread counts as idle again.
pub struct LoadingThread {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LoadingThread {
    pub fn new(handoff: impl Fn(PendingOperation) + Send + 'static) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("Resource Loading".into())
            .spawn(move || process_operations(&worker_shared, handoff))?;

        info!(target: "resources::loading", "Started the resource loading thread");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn queue_operation(&self, operation: PendingOperation) {
        let mut queue = self.shared.lock();
        if queue.stopped {
            drop(queue);
            operation.discard("since the loading thread is stopped");
            return;
        }
        trace!(target: "resources::loading", "Queued {}", operation);
        queue.operations.push_back(operation);
        drop(queue);
        self.shared.work_available.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().operations.len()
    }

    /// Blocks until the queue is empty and no operation is running.
    pub fn wait_idle(&self) {
        let mut queue = self.shared.lock();
        while !queue.operations.is_empty() || queue.busy {
            queue = self.shared.idle.wait(queue).expect("Loading queue lock");
        }
    }

    /// Discards everything not yet started, lets the running operation finish and joins the worker.
    /// Calling this more than once is a no-op.
    pub fn shutdown(&self) {
        let discarded = {
            let mut queue = self.shared.lock();
            if queue.stopped {
                return;
            }
            queue.stopped = true;
            std::mem::take(&mut queue.operations)
        };
        self.shared.work_available.notify_all();
        self.shared.idle.notify_all();

        for operation in discarded {
            operation.discard("on shutdown");
        }

        let worker = self.worker.lock().expect("Loading worker handle lock").take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!(target: "resources::loading", "The resource loading thread panicked");
            }
        }
        info!(target: "resources::loading", "Stopped the resource loading thread");
    }
}

impl Drop for LoadingThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn process_operations(shared: &Shared, handoff: impl Fn(PendingOperation)) {
    loop {
        let operation = {
            let mut queue = shared.lock();
            loop {
                if queue.stopped {
                    debug!(target: "resources::loading", "Stopping processing operations");
                    return;
                }
                if let Some(operation) = queue.operations.pop_front() {
                    queue.busy = true;
                    break operation;
                }
                queue = shared.work_available.wait(queue).expect("Loading queue lock");
            }
        };

        // unload hooks aren't caught by the resource, they must not take the whole queue down
        match std::panic::catch_unwind(AssertUnwindSafe(|| operation.execute())) {
            Ok(outcome) => {
                if outcome.succeeded {
                    debug!(target: "resources::loading", "Processed {}", operation);
                } else {
                    warn!(target: "resources::loading", "Failed to process {}", operation);
                }
                if let Some(next) = outcome.handoff {
                    handoff(next);
                }
            }
            Err(_) => error!(target: "resources::loading", "Processing {} panicked", operation),
        }
        drop(operation);

        let mut queue = shared.lock();
        queue.busy = false;
        if queue.operations.is_empty() {
            shared.idle.notify_all();
        }
    }
}
