//! Fixed-size pool of OS threads fed from one FIFO queue.

use crate::error::{ProxyError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

/// A unit of work. Everything it needs is moved in; nothing is borrowed
/// from the submitter.
pub struct Task {
    label: String,
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub fn new(label: impl Into<String>, job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            job: Box::new(job),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Panicked,
}

/// Completion signal for one submitted task. The accept loop drops it;
/// tests block on it.
pub struct TaskHandle {
    #[cfg_attr(not(test), allow(dead_code))]
    done: mpsc::Receiver<TaskOutcome>,
}

#[cfg(test)]
impl TaskHandle {
    /// Block until the task has run. A task that never ran (its worker
    /// died) reports `Panicked`.
    pub fn wait(self) -> TaskOutcome {
        self.done.recv().unwrap_or(TaskOutcome::Panicked)
    }
}

struct Queued {
    task: Task,
    done: mpsc::Sender<TaskOutcome>,
}

struct Queue {
    tasks: VecDeque<Queued>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ProxyError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool needs at least one thread",
            )));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("proxy-worker-{id}"))
                .spawn(move || worker_loop(id, &shared))?;
            workers.push(handle);
        }

        tracing::info!(workers = size, "worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queue a task. Tasks start in submission order.
    pub fn submit(&self, task: Task) -> Result<TaskHandle> {
        let (tx, rx) = mpsc::channel();
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return Err(ProxyError::PoolClosed);
            }
            queue.tasks.push_back(Queued { task, done: tx });
        }
        self.shared.available.notify_one();
        Ok(TaskHandle { done: rx })
    }

    /// Stop accepting work, let workers drain the queue, then join them.
    /// Must not be called from a worker thread.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed && self.workers.lock().is_empty() {
                return;
            }
            queue.closed = true;
        }
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("worker thread exited abnormally");
            }
        }
        if count > 0 {
            tracing::info!(workers = count, "worker pool stopped");
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    loop {
        let Queued { task, done } = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(next) = queue.tasks.pop_front() {
                    break next;
                }
                if queue.closed {
                    tracing::debug!(worker = id, "worker exiting");
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        let Task { label, job } = task;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => TaskOutcome::Completed,
            Err(payload) => {
                tracing::error!(
                    worker = id,
                    task = %label,
                    panic = panic_message(payload.as_ref()),
                    "task panicked"
                );
                TaskOutcome::Panicked
            }
        };
        // Nobody may be waiting on the handle
        let _ = done.send(outcome);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
