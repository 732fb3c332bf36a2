// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The primary thread.
//!
//! Exactly one thread per process binds itself as primary. Work submitted to
//! `ThreadSelector::Primary` waits in a queue until that thread calls
//! `pump()`, which also ticks the latent action manager. Hosts with their own
//! update loop call `pump()` from it; everyone else uses `PrimaryLoop`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::queue::JobQueue;
use super::{current_class, run_job, set_current_class, Job, ThreadClass};
use crate::error::RuntimeError;
use crate::runtime;

pub(crate) struct PrimaryQueue {
    queue: JobQueue,
    /// Name of the bound thread, for diagnostics.
    bound: Mutex<Option<String>>,
}

impl PrimaryQueue {
    pub fn new() -> Self {
        Self {
            queue: JobQueue::new(),
            bound: Mutex::new(None),
        }
    }

    pub fn push(&self, job: Job) {
        self.queue.push(job);
    }

    fn bind(&self) -> Result<(), RuntimeError> {
        let mut bound = self.bound.lock().unwrap();
        if let Some(name) = bound.as_ref() {
            return Err(RuntimeError::PrimaryAlreadyBound(name.clone()));
        }
        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
        tracing::debug!(thread = %name, "bound primary thread");
        *bound = Some(name);
        set_current_class(ThreadClass::Primary);
        Ok(())
    }

    fn unbind(&self) {
        *self.bound.lock().unwrap() = None;
        set_current_class(ThreadClass::Foreign);
    }
}

/// Make the calling thread the primary thread.
pub fn bind_primary() -> Result<(), RuntimeError> {
    runtime::get().dispatcher().primary().bind()
}

pub fn is_primary_thread() -> bool {
    current_class() == ThreadClass::Primary
}

/// Run every job queued for the primary thread, then tick latent actions.
/// Jobs queued while the batch runs wait for the next call.
///
/// Returns the number of jobs run.
pub fn pump() -> usize {
    crate::verify!(is_primary_thread(), "pump() called off the primary thread");
    let batch = runtime::get().dispatcher().primary().queue.take_batch();
    let count = batch.len();
    for job in batch {
        run_job(job);
    }
    crate::latent::tick();
    count
}

/// A background thread that binds itself as primary and pumps until stopped.
pub struct PrimaryLoop {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PrimaryLoop {
    /// Start a primary loop pumping at least every `interval`.
    pub fn spawn(interval: Duration) -> Result<Self, RuntimeError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let name = format!("{}-primary", runtime::get().config().thread_name_prefix);

        let thread_stop = stop.clone();
        let spawned = thread::Builder::new().name(name).spawn(move || {
            if let Err(err) = bind_primary() {
                let _ = tx.send(Err(err));
                return;
            }
            let _ = tx.send(Ok(()));
            let primary = runtime::get().dispatcher().primary();
            while !thread_stop.load(Ordering::Acquire) {
                pump();
                primary.queue.wait_for_work(interval);
            }
            primary.unbind();
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => crate::fatal!("failed to spawn primary loop thread: {err}"),
        };

        match rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                handle: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => crate::fatal!("primary loop thread exited before binding"),
        }
    }

    /// Start a primary loop using the configured tick interval.
    pub fn start() -> Result<Self, RuntimeError> {
        Self::spawn(runtime::get().config().primary_tick())
    }

    /// Stop pumping and release the primary binding. Jobs still queued stay
    /// queued for the next primary thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Release);
            // Wake the loop if it is parked.
            runtime::get()
                .dispatcher()
                .primary()
                .push(Box::new(|| {}));
            let _ = handle.join();
        }
    }
}

impl Drop for PrimaryLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
