//! Bounded encode/write queue.
//!
//! Render threads submit tasks; a small fixed pool of writer threads runs
//! them. `submit` blocks once `capacity` tasks are queued, which bounds the
//! number of rasters held in memory. `wait_all` blocks until every submitted
//! task has finished.

use crate::error::Result;
use crossbeam_channel::{bounded, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Upper bound on writer threads regardless of render thread count.
pub const MAX_WRITERS: usize = 4;

type WriteTask = Box<dyn FnOnce() + Send + 'static>;

/// Queue capacity and writer count for `render_threads` producers.
pub fn sizing_for(render_threads: usize) -> (usize, usize) {
    let capacity = (2 * render_threads).max(2);
    let writers = (render_threads / 2).clamp(1, MAX_WRITERS);
    (capacity, writers)
}

#[derive(Debug, Default)]
struct Counters {
    pending: usize,
    completed: usize,
}

#[derive(Debug, Default)]
struct Completion {
    counters: Mutex<Counters>,
    drained: Condvar,
}

impl Completion {
    fn finish_one(&self) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters.pending -= 1;
        counters.completed += 1;
        if counters.pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// Decrements the pending count even if the task panics.
struct TaskGuard<'a>(&'a Completion);

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

pub struct AsyncWriteQueue {
    sender: Option<Sender<WriteTask>>,
    writers: Vec<JoinHandle<()>>,
    completion: Arc<Completion>,
    capacity: usize,
}

impl AsyncWriteQueue {
    pub fn new(capacity: usize, writer_count: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded::<WriteTask>(capacity);
        let completion = Arc::new(Completion::default());

        let mut writers = Vec::with_capacity(writer_count.max(1));
        for id in 0..writer_count.max(1) {
            let receiver = receiver.clone();
            let completion = Arc::clone(&completion);
            let handle = thread::Builder::new()
                .name(format!("page-writer-{id}"))
                .spawn(move || {
                    for task in receiver.iter() {
                        let _guard = TaskGuard(&completion);
                        task();
                    }
                })?;
            writers.push(handle);
        }
        debug!(capacity, writers = writers.len(), "Write queue started");

        Ok(Self {
            sender: Some(sender),
            writers,
            completion,
            capacity,
        })
    }

    /// Queue sized for `render_threads` producers.
    pub fn for_render_threads(render_threads: usize) -> Result<Self> {
        let (capacity, writers) = sizing_for(render_threads);
        Self::new(capacity, writers)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        match self.completion.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue `task`, blocking while the queue is full.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.counters().pending += 1;
        let task: WriteTask = Box::new(task);
        let unsent = match &self.sender {
            Some(sender) => sender.send(task).err().map(|e| e.into_inner()),
            None => Some(task),
        };
        // Every writer is gone; run the task on the producer instead of losing it.
        if let Some(task) = unsent {
            warn!("Write queue has no writers, writing inline");
            let _guard = TaskGuard(&self.completion);
            task();
        }
    }

    /// Block until no task is queued or running.
    pub fn wait_all(&self) {
        let mut counters = self.counters();
        while counters.pending > 0 {
            counters = match self.completion.drained.wait(counters) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    pub fn pending(&self) -> usize {
        self.counters().pending
    }

    pub fn completed(&self) -> usize {
        self.counters().completed
    }
}

impl Drop for AsyncWriteQueue {
    fn drop(&mut self) {
        // Closing the channel ends the writer loops once they drain it.
        self.sender.take();
        for handle in self.writers.drain(..) {
            if handle.join().is_err() {
                warn!("Page writer thread panicked");
            }
        }
    }
}
