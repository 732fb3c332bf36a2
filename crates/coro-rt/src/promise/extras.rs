// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Promise extras: the part of a promise that outlives its frame.
//!
//! Handles, joiners and the latent manager hold these to query completion
//! and block on it without touching the frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::cancel::CancellationTracker;

/// How a coroutine finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The body returned.
    Completed,
    /// The frame was destroyed by cancellation or owner teardown.
    Canceled,
    /// A segment panicked.
    Panicked(String),
}

type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Token for removing a registered continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContinuationId(u64);

struct Completion {
    outcome: Option<Outcome>,
    continuations: Vec<(u64, Continuation)>,
    next_id: u64,
}

pub(crate) struct PromiseExtras {
    id: u64,
    name: Option<String>,
    completion: Mutex<Completion>,
    done: Condvar,
    cancel: CancellationTracker,
    suspensions: AtomicU64,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl PromiseExtras {
    pub fn new(name: Option<String>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            completion: Mutex::new(Completion {
                outcome: None,
                continuations: Vec::new(),
                next_id: 0,
            }),
            done: Condvar::new(),
            cancel: CancellationTracker::new(),
            suspensions: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationTracker {
        &self.cancel
    }

    pub fn note_suspension(&self) {
        self.suspensions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn suspension_count(&self) -> u64 {
        self.suspensions.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.completion.lock().unwrap().outcome.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.completion.lock().unwrap().outcome.clone()
    }

    /// Record the outcome, wake blocked waiters, then run continuations
    /// outside the lock. Completing twice is fatal.
    pub fn complete(&self, outcome: Outcome) {
        let continuations = {
            let mut completion = self.completion.lock().unwrap();
            if let Some(previous) = &completion.outcome {
                crate::fatal!(
                    "coroutine {} completed twice ({previous:?}, then {outcome:?})",
                    self.id
                );
            }
            completion.outcome = Some(outcome);
            std::mem::take(&mut completion.continuations)
        };
        self.done.notify_all();
        for (_, continuation) in continuations {
            continuation();
        }
    }

    /// Run `f` once the coroutine completes, or right now if it already has.
    /// Returns `None` in the second case.
    pub fn on_completion(&self, f: impl FnOnce() + Send + 'static) -> Option<ContinuationId> {
        let mut completion = self.completion.lock().unwrap();
        if completion.outcome.is_some() {
            drop(completion);
            f();
            return None;
        }
        let id = completion.next_id;
        completion.next_id += 1;
        completion.continuations.push((id, Box::new(f)));
        Some(ContinuationId(id))
    }

    /// Drop a continuation that has not run yet.
    pub fn remove_continuation(&self, id: ContinuationId) -> bool {
        let mut completion = self.completion.lock().unwrap();
        let before = completion.continuations.len();
        completion.continuations.retain(|(cid, _)| *cid != id.0);
        completion.continuations.len() != before
    }

    pub fn wait(&self) -> Outcome {
        let mut completion = self.completion.lock().unwrap();
        loop {
            if let Some(outcome) = &completion.outcome {
                return outcome.clone();
            }
            completion = self.done.wait(completion).unwrap();
        }
    }

    /// Block up to `timeout`. True if the coroutine completed in time.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completion = self.completion.lock().unwrap();
        while completion.outcome.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            completion = self.done.wait_timeout(completion, deadline - now).unwrap().0;
        }
        true
    }
}
