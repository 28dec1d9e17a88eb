//! Background preload workers
//!
//! A fixed set of threads pulling jobs from a `flume` channel. Dropping the
//! pool closes the channel; workers drain what is already queued, exit, and
//! are joined.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct PreloadPool {
    sender: Option<flume::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl PreloadPool {
    /// Spawn `size` workers (at least one)
    pub(crate) fn new(size: usize) -> Self {
        let (sender, receiver) = flume::unbounded::<Job>();
        let mut workers = Vec::new();

        for n in 0..size.max(1) {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("comicview-preload-{}", n))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        // Keep the worker alive if a codec panics
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::warn!("Preload job panicked");
                        }
                    }
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::warn!("Could not spawn preload worker {}: {}", n, e),
            }
        }

        tracing::debug!("Preload pool started with {} workers", workers.len());
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a job; returns it back when no worker is available to run it
    pub(crate) fn submit(&self, job: Job) -> std::result::Result<(), Job> {
        if self.workers.is_empty() {
            return Err(job);
        }
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for PreloadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("Preload worker panicked");
            }
        }
    }
}
