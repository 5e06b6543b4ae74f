//! Ordered executor
//!
//! A fixed set of worker threads, each draining its own queue. Tasks carry an
//! ordering key (the ledger id); tasks with the same key always land on the
//! same worker and therefore run one after another in submission order.

use crossbeam_channel::{Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Unit of work run on a worker thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct OrderedExecutor {
    queues: RwLock<Option<Vec<Sender<Task>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OrderedExecutor {
    /// Start `num_workers` threads (at least one)
    pub fn new(name: &str, num_workers: usize) -> std::io::Result<Self> {
        let num_workers = num_workers.max(1);
        let mut queues = Vec::with_capacity(num_workers);
        let mut workers = Vec::with_capacity(num_workers);

        for i in 0..num_workers {
            let (tx, rx) = unbounded::<Task>();
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    // Runs until every sender is dropped and the queue is drained
                    for task in rx {
                        task();
                    }
                })?;
            queues.push(tx);
            workers.push(handle);
        }

        debug!("Started {} {} workers", num_workers, name);
        Ok(Self {
            queues: RwLock::new(Some(queues)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue `task` behind earlier tasks with the same key
    ///
    /// After shutdown the task is handed back to the caller.
    pub fn submit(&self, key: i64, task: Task) -> Result<(), Task> {
        let queues = self.queues.read();
        let Some(queues) = queues.as_ref() else {
            return Err(task);
        };
        let idx = (key.unsigned_abs() % queues.len() as u64) as usize;
        queues[idx].send(task).map_err(|e| e.into_inner())
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.queues.read().is_none()
    }

    /// Stop accepting tasks, run what is queued, and join the workers
    pub fn shutdown(&self) {
        // Closing the queues lets workers exit once drained
        drop(self.queues.write().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Executor worker panicked");
            }
        }
    }
}

impl Drop for OrderedExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
