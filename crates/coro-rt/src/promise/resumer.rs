// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot continuations.

use std::sync::{Arc, Mutex};

use super::Promise;
use crate::dispatch::{self, spawn_dedicated, Job, ThreadOptions, ThreadSelector};
use crate::latent::LatentOwner;

/// What happened when a `Resumer` was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The coroutine ran its next segment.
    Resumed,
    /// The coroutine was torn down or canceled first; nothing ran.
    Abandoned,
}

/// Keeps a managed coroutine's owner resident until dropped.
pub(crate) struct OwnerPin(Arc<dyn LatentOwner>);

impl OwnerPin {
    pub fn new(owner: &Arc<dyn LatentOwner>) -> Self {
        owner.pin();
        Self(owner.clone())
    }
}

impl Drop for OwnerPin {
    fn drop(&mut self) {
        self.0.unpin();
    }
}

/// Continuation for exactly one suspension of one coroutine.
///
/// Consumed by `resume`. Dropping it unconsumed leaves the coroutine
/// suspended for good, which is only expected while it is being destroyed.
pub struct Resumer {
    promise: Option<Promise>,
    /// Held from `detach` until the resumer is consumed or dropped.
    pin: Option<OwnerPin>,
}

impl Resumer {
    pub(super) fn new(promise: Promise) -> Self {
        Self {
            promise: Some(promise),
            pin: None,
        }
    }

    fn take(&mut self) -> Promise {
        match self.promise.take() {
            Some(promise) => promise,
            None => crate::fatal!("resumer used after it was consumed"),
        }
    }

    pub(crate) fn promise(&self) -> &Promise {
        match &self.promise {
            Some(promise) => promise,
            None => crate::fatal!("resumer used after it was consumed"),
        }
    }

    /// Id of the coroutine this resumes.
    pub fn coroutine_id(&self) -> u64 {
        self.promise().id()
    }

    /// Continue the coroutine on the calling thread.
    pub fn resume(mut self) -> ResumeOutcome {
        self.take().resume_suspended()
    }

    /// Continue the coroutine on a thread matching `selector`.
    pub fn resume_on(self, selector: ThreadSelector) {
        tracing::trace!(coroutine = self.coroutine_id(), ?selector, "dispatching resumption");
        self.hand_off(|job| dispatch::submit(selector, job));
    }

    /// Continue the coroutine on a brand-new thread.
    pub fn resume_on_new_thread(self, options: ThreadOptions) {
        tracing::trace!(coroutine = self.coroutine_id(), thread = %options.name, "resuming on new thread");
        self.hand_off(|job| spawn_dedicated(options, job));
    }

    /// Mark a managed coroutine as detached and pin its owner until this
    /// resumer is used. Anything that resumes from another thread, or holds
    /// the resumer somewhere owner teardown cannot see, detaches first so
    /// teardown defers to it. Idempotent.
    pub(crate) fn detach(&mut self) {
        if self.pin.is_some() {
            return;
        }
        let promise = self.promise();
        promise.state_cell().begin_detach();
        let pin = promise.owner().map(OwnerPin::new);
        self.pin = pin;
    }

    fn hand_off(mut self, spawn: impl FnOnce(Job)) {
        self.detach();
        spawn(Box::new(move || {
            let _ = self.resume();
        }));
    }

    /// Drop without resuming. Used when the coroutine is already gone.
    pub(crate) fn abandon(mut self) {
        self.promise = None;
    }
}

impl Drop for Resumer {
    fn drop(&mut self) {
        if let Some(promise) = self.promise.take() {
            tracing::debug!(coroutine = promise.id(), "resumer dropped without resuming");
        }
    }
}

impl std::fmt::Debug for Resumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resumer")
            .field("coroutine", &self.promise.as_ref().map(Promise::id))
            .finish()
    }
}

/// A resumer two parties race for. Whoever takes it resumes.
#[derive(Clone)]
pub(crate) struct ResumerSlot(Arc<Mutex<Option<Resumer>>>);

impl ResumerSlot {
    pub fn new(resumer: Resumer) -> Self {
        Self(Arc::new(Mutex::new(Some(resumer))))
    }

    pub fn take(&self) -> Option<Resumer> {
        self.0.lock().unwrap().take()
    }
}

/// Registered by a cancel-aware awaiter while suspended. `unlink` removes
/// the pending registration and hands back its resumer if it still had it.
pub(crate) struct CancelHook {
    selector: ThreadSelector,
    unlink: Box<dyn FnOnce() -> Option<Resumer> + Send + 'static>,
}

impl CancelHook {
    pub fn new(
        selector: ThreadSelector,
        unlink: impl FnOnce() -> Option<Resumer> + Send + 'static,
    ) -> Self {
        Self {
            selector,
            unlink: Box::new(unlink),
        }
    }

    /// Unlink and resume so the coroutine reaches its cancellation point.
    pub fn fire(self) {
        if let Some(resumer) = (self.unlink)() {
            resumer.resume_on(self.selector);
        }
    }

    /// Unlink a registration whose coroutine is already destroyed.
    pub fn discard(self) {
        if let Some(resumer) = (self.unlink)() {
            resumer.abandon();
        }
    }
}
