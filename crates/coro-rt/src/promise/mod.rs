// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Promises: per-invocation control blocks.
//!
//! A promise owns the coroutine frame (the boxed body future) and drives it
//! one segment at a time. Each segment is a single poll taken under the
//! frame lock, so a resumption that arrives while the suspending segment is
//! still returning waits for it instead of running concurrently.
//!
//! A segment ends when the body suspends on an awaiter, which hands out a
//! `Resumer`. Invoking that resumer runs the next segment. Exactly one
//! resumer exists per suspension.

mod cancel;
mod extras;
mod resumer;
mod state;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Wake, Waker};

use crate::dispatch::{self, is_primary_thread, ThreadSelector};
use crate::latent::{LatentOwner, LatentWait};

pub use cancel::{
    cancellation_guard, is_current_coroutine_canceled, on_canceled, CancellationGuard,
    CancellationTracker, OnCanceled,
};
pub use extras::Outcome;
pub use resumer::{ResumeOutcome, Resumer};
pub use state::ExecutionState;

pub(crate) use extras::{ContinuationId, PromiseExtras};
pub(crate) use resumer::{CancelHook, OwnerPin, ResumerSlot};
pub(crate) use state::{Handoff, StateCell, Teardown};

/// Type-erased coroutine body. The typed result is written to a slot the
/// handle owns.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Inner {
    extras: Arc<PromiseExtras>,
    state: StateCell,
    frame: Mutex<Option<BoxFuture>>,
    /// Set while a resumer for the current suspension is outstanding.
    suspended: AtomicBool,
    /// Destroy the frame when the current segment returns.
    finish_now: AtomicBool,
    cancel_hook: Mutex<Option<CancelHook>>,
    owner: Option<Arc<dyn LatentOwner>>,
    latent_wait: Mutex<Option<LatentWait>>,
}

#[derive(Clone)]
pub(crate) struct Promise(Arc<Inner>);

thread_local! {
    /// Promises being polled on this thread, innermost last.
    static POLLING: RefCell<Vec<Promise>> = const { RefCell::new(Vec::new()) };
    static DESTROYING: Cell<usize> = const { Cell::new(0) };
}

/// Waker handed to the body. The runtime resumes through `Resumer`s, never
/// through wake-ups, so foreign futures waiting on one stall.
struct InertWaker;

impl Wake for InertWaker {
    fn wake(self: Arc<Self>) {}
}

struct PollingGuard;

impl PollingGuard {
    fn enter(promise: Promise) -> Self {
        POLLING.with(|stack| stack.borrow_mut().push(promise));
        PollingGuard
    }
}

impl Drop for PollingGuard {
    fn drop(&mut self) {
        POLLING.with(|stack| stack.borrow_mut().pop());
    }
}

struct DestroyingGuard;

impl DestroyingGuard {
    fn enter() -> Self {
        DESTROYING.with(|d| d.set(d.get() + 1));
        DestroyingGuard
    }
}

impl Drop for DestroyingGuard {
    fn drop(&mut self) {
        DESTROYING.with(|d| d.set(d.get() - 1));
    }
}

/// Whether this thread is currently dropping a frame for cancellation or
/// teardown.
pub(crate) fn is_destroying() -> bool {
    DESTROYING.with(|d| d.get() > 0)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

impl Promise {
    /// A promise for `frame`. Managed when it has an owner.
    pub fn new(
        frame: BoxFuture,
        name: Option<String>,
        owner: Option<Arc<dyn LatentOwner>>,
    ) -> Self {
        let state = if owner.is_some() {
            ExecutionState::ManagedRunning
        } else {
            ExecutionState::Running
        };
        Promise(Arc::new(Inner {
            extras: Arc::new(PromiseExtras::new(name)),
            state: StateCell::new(state),
            frame: Mutex::new(Some(frame)),
            suspended: AtomicBool::new(false),
            finish_now: AtomicBool::new(false),
            cancel_hook: Mutex::new(None),
            owner,
            latent_wait: Mutex::new(None),
        }))
    }

    /// The innermost promise being polled on this thread.
    pub fn current() -> Option<Promise> {
        POLLING.with(|stack| stack.borrow().last().cloned())
    }

    pub fn id(&self) -> u64 {
        self.0.extras.id()
    }

    pub fn extras(&self) -> &Arc<PromiseExtras> {
        &self.0.extras
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.0.state.load()
    }

    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.0.state
    }

    pub fn is_managed(&self) -> bool {
        self.0.owner.is_some()
    }

    pub fn owner(&self) -> Option<&Arc<dyn LatentOwner>> {
        self.0.owner.as_ref()
    }

    fn is_polling_here(&self) -> bool {
        POLLING.with(|stack| stack.borrow().iter().any(|p| Arc::ptr_eq(&p.0, &self.0)))
    }

    /// Run the first segment on the calling thread.
    pub fn start(&self) {
        tracing::trace!(coroutine = self.id(), name = ?self.0.extras.name(), "starting coroutine");
        self.run_segment();
    }

    /// The one resumer for the suspension about to happen.
    pub fn resumer(&self) -> Resumer {
        if self.0.suspended.swap(true, Ordering::SeqCst) {
            crate::fatal!(
                "recursive suspension of coroutine {}: a resumer is already outstanding",
                self.id()
            );
        }
        self.0.extras.note_suspension();
        tracing::trace!(coroutine = self.id(), "suspending");
        Resumer::new(self.clone())
    }

    fn resume_suspended(&self) -> ResumeOutcome {
        // Pinned while a managed segment runs away from the primary thread.
        let mut _owner_pin = None;
        if let Some(owner) = self.owner() {
            let on_primary = is_primary_thread();
            let handoff = if on_primary {
                self.0.state.reattach()
            } else {
                self.0.state.detach_for_resume()
            };
            match handoff {
                Handoff::Resume if !on_primary => _owner_pin = Some(OwnerPin::new(owner)),
                Handoff::Resume => {}
                Handoff::Destroy => {
                    tracing::debug!(coroutine = self.id(), "deferred destroy replaces resumption");
                    if on_primary {
                        self.destroy();
                    } else {
                        let promise = self.clone();
                        dispatch::submit(ThreadSelector::Primary, move || promise.destroy());
                    }
                    return ResumeOutcome::Abandoned;
                }
                Handoff::Finished => {
                    if self.execution_state() == ExecutionState::Done {
                        crate::fatal!("coroutine {} resumed after completion", self.id());
                    }
                    // Teardown claimed it; the frame may still be on its way out.
                    tracing::debug!(coroutine = self.id(), "resumption of a torn-down coroutine abandoned");
                    return ResumeOutcome::Abandoned;
                }
            }
        }

        if let Some(outcome) = self.0.extras.outcome() {
            if outcome == Outcome::Canceled {
                tracing::debug!(coroutine = self.id(), "resumption of a destroyed coroutine abandoned");
                return ResumeOutcome::Abandoned;
            }
            crate::fatal!("coroutine {} resumed after completion ({outcome:?})", self.id());
        }
        if self.is_polling_here() {
            crate::fatal!("coroutine {} resumed from inside its own segment", self.id());
        }
        if self
            .0
            .suspended
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            crate::fatal!("coroutine {} resumed twice for one suspension", self.id());
        }
        self.run_segment()
    }

    /// Poll the frame once, or destroy it if cancellation is due.
    fn run_segment(&self) -> ResumeOutcome {
        let mut frame = self.0.frame.lock().unwrap();
        let Some(future) = frame.as_mut() else {
            tracing::debug!(coroutine = self.id(), "frame already destroyed");
            return ResumeOutcome::Abandoned;
        };
        // Whatever the previous suspension registered has been consumed.
        drop(self.0.cancel_hook.lock().unwrap().take());

        if self.0.extras.cancellation().should_cancel(false) {
            let future = frame.take();
            drop(frame);
            self.destroy_frame(future);
            return ResumeOutcome::Abandoned;
        }

        let suspensions = self.0.extras.suspension_count();
        let waker = Waker::from(Arc::new(InertWaker));
        let mut cx = Context::from_waker(&waker);
        let polled = {
            let _polling = PollingGuard::enter(self.clone());
            catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        };

        match polled {
            Ok(Poll::Ready(())) => {
                *frame = None;
                drop(frame);
                tracing::trace!(coroutine = self.id(), "coroutine completed");
                self.finish(Outcome::Completed);
            }
            Ok(Poll::Pending) => {
                if self.0.finish_now.swap(false, Ordering::SeqCst) {
                    let future = frame.take();
                    drop(frame);
                    if self.is_managed() && !is_primary_thread() {
                        // Managed frames are destroyed where their owner lives.
                        let promise = self.clone();
                        dispatch::submit(ThreadSelector::Primary, move || {
                            promise.destroy_frame(future)
                        });
                    } else {
                        self.destroy_frame(future);
                    }
                } else if self.0.extras.suspension_count() == suspensions {
                    tracing::warn!(
                        coroutine = self.id(),
                        "segment returned Pending without suspending on a runtime awaiter; \
                         the coroutine will not be resumed"
                    );
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let future = frame.take();
                drop(frame);
                drop(future);
                tracing::error!(coroutine = self.id(), "coroutine panicked: {message}");
                self.finish(Outcome::Panicked(message));
            }
        }
        ResumeOutcome::Resumed
    }

    fn finish(&self, outcome: Outcome) {
        if self.is_managed() {
            let state = match outcome {
                Outcome::Canceled => ExecutionState::Canceled,
                _ => ExecutionState::Done,
            };
            self.0.state.finish(state);
        }
        self.0.extras.complete(outcome);
    }

    fn destroy_frame(&self, future: Option<BoxFuture>) {
        let Some(future) = future else {
            return;
        };
        tracing::debug!(coroutine = self.id(), "destroying coroutine frame");
        {
            let _destroying = DestroyingGuard::enter();
            drop(future);
        }
        let hook = self.0.cancel_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook.discard();
        }
        let wait = self.0.latent_wait.lock().unwrap().take();
        if let Some(wait) = wait {
            wait.discard();
        }
        self.finish(Outcome::Canceled);
    }

    /// Destroy the frame now. A no-op if it is already gone.
    pub(crate) fn destroy(&self) {
        if self.is_polling_here() {
            crate::fatal!("coroutine {} destroyed from inside its own segment", self.id());
        }
        let future = self.0.frame.lock().unwrap().take();
        self.destroy_frame(future);
    }

    /// Owner teardown, on the primary thread. Deferred while the coroutine
    /// is detached; holds do not delay it.
    pub(crate) fn teardown(&self) {
        crate::verify!(is_primary_thread(), "coroutine teardown off the primary thread");
        if self.0.extras.is_done() {
            return;
        }
        match self.0.state.request_destroy() {
            Teardown::Finished => {}
            Teardown::Deferred => {
                tracing::debug!(coroutine = self.id(), "teardown deferred until the coroutine returns");
                // Waiting on something cancel-aware: bring it back now.
                let hook = self.0.cancel_hook.lock().unwrap().take();
                if let Some(hook) = hook {
                    hook.fire();
                }
            }
            Teardown::DestroyNow => self.destroy(),
        }
    }

    /// A managed coroutine was torn down while detached and has not been
    /// destroyed yet.
    pub(crate) fn destroy_pending(&self) -> bool {
        self.is_managed() && self.execution_state() == ExecutionState::DeferredDestroy
    }

    /// Whether a suspension point reached now must end the coroutine instead.
    pub(crate) fn should_finish_now(&self) -> bool {
        self.0.extras.cancellation().should_cancel(false) || self.destroy_pending()
    }

    /// Flag cancellation. Plain coroutines waiting on a cancel-aware awaiter
    /// are brought back right away; managed ones are torn down on the next
    /// latent tick.
    pub(crate) fn request_cancel(&self) {
        tracing::debug!(coroutine = self.id(), "cancellation requested");
        self.0.extras.cancellation().cancel();
        self.fire_cancel_hook_if_due();
    }

    /// Plain coroutines come back for cancellation; managed ones only for a
    /// pending deferred destroy, the rest waits for the latent tick.
    pub(crate) fn fire_cancel_hook_if_due(&self) {
        let due = if self.is_managed() {
            self.destroy_pending()
        } else {
            self.0.extras.cancellation().should_cancel(false)
        };
        if !due {
            return;
        }
        let hook = self.0.cancel_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook.fire();
        }
    }

    pub(crate) fn set_cancel_hook(&self, hook: CancelHook) {
        *self.0.cancel_hook.lock().unwrap() = Some(hook);
    }

    pub(crate) fn mark_finish_now(&self) {
        self.0.finish_now.store(true, Ordering::SeqCst);
    }

    pub(crate) fn latent_wait(&self) -> MutexGuard<'_, Option<LatentWait>> {
        self.0.latent_wait.lock().unwrap()
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("name", &self.0.extras.name())
            .field("state", &self.execution_state())
            .finish()
    }
}
