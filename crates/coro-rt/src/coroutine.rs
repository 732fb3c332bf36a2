// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Spawning coroutines and the handles that observe them.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::awaiter::{Await, Awaiter};
use crate::dispatch::{self, ThreadSelector};
use crate::latent::LatentOwner;
use crate::promise::{
    CancelHook, ExecutionState, Outcome, Promise, PromiseExtras, Resumer, ResumerSlot,
};

/// Handle to a running or finished coroutine. Clones observe the same
/// coroutine and share its result.
pub struct Coroutine<T> {
    promise: Promise,
    result: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Coroutine<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            result: self.result.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Coroutine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl<T> Coroutine<T> {
    pub fn id(&self) -> u64 {
        self.promise.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.promise.extras().name()
    }

    pub fn is_done(&self) -> bool {
        self.promise.extras().is_done()
    }

    /// `None` while still running.
    pub fn outcome(&self) -> Option<Outcome> {
        self.promise.extras().outcome()
    }

    /// True once the body has returned normally.
    pub fn was_successful(&self) -> bool {
        self.outcome() == Some(Outcome::Completed)
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.promise.execution_state()
    }

    /// Number of times the coroutine has suspended so far.
    pub fn suspension_count(&self) -> u64 {
        self.promise.extras().suspension_count()
    }

    /// Block the calling thread until the coroutine finishes.
    pub fn wait(&self) -> Outcome {
        self.promise.extras().wait()
    }

    /// Block up to `timeout`. True if the coroutine finished.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.promise.extras().wait_for(timeout)
    }

    /// Request cancellation. The body stops at its next suspension point.
    pub fn cancel(&self) {
        self.promise.request_cancel();
    }

    /// Take the value the body returned. Later calls, and other clones,
    /// get `None`.
    pub fn take_result(&self) -> Option<T> {
        self.result.lock().unwrap().take()
    }

    /// Run `f` when the coroutine finishes, or now if it already has.
    pub fn on_completion(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.promise.extras().on_completion(f);
    }

    /// Suspend the awaiting coroutine until this one finishes. Yields the
    /// result, or `None` if it was canceled or panicked.
    pub fn join(self) -> Await<JoinAwaiter<T>> {
        Await::new(JoinAwaiter {
            target: self.promise.extras().clone(),
            result: self.result,
        })
    }

    pub(crate) fn promise(&self) -> &Promise {
        &self.promise
    }
}

impl<T: Clone> Coroutine<T> {
    /// Copy of the returned value, leaving it in place.
    pub fn result(&self) -> Option<T> {
        self.result.lock().unwrap().clone()
    }
}

/// Suspension point for `Coroutine::join`.
pub struct JoinAwaiter<T> {
    target: Arc<PromiseExtras>,
    result: Arc<Mutex<Option<T>>>,
}

impl<T> Awaiter for JoinAwaiter<T> {
    type Output = Option<T>;

    fn ready(&mut self) -> bool {
        self.target.is_done()
    }

    fn suspend(&mut self, resumer: Resumer) {
        let selector = ThreadSelector::current();
        let promise = resumer.promise().clone();
        let slot = ResumerSlot::new(resumer);

        // Runs inline if the target finished since `ready`; the dispatch
        // keeps that from resuming us inside our own segment.
        let fire = slot.clone();
        let registered = self.target.on_completion(move || {
            if let Some(resumer) = fire.take() {
                resumer.resume_on(selector);
            }
        });

        let target = self.target.clone();
        promise.set_cancel_hook(CancelHook::new(selector, move || {
            if let Some(id) = registered {
                target.remove_continuation(id);
            }
            slot.take()
        }));
    }

    fn resume(&mut self) -> Option<T> {
        self.result.lock().unwrap().take()
    }
}

/// Configures a coroutine before it starts.
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Start the coroutine on the calling thread; returns at its first
    /// suspension or when it finishes.
    pub fn spawn<F>(self, future: F) -> Coroutine<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let coroutine = self.build(future, None);
        coroutine.promise.start();
        coroutine
    }

    /// Start the coroutine on a thread matching `selector`.
    pub fn spawn_on<F>(self, selector: ThreadSelector, future: F) -> Coroutine<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let coroutine = self.build(future, None);
        let promise = coroutine.promise.clone();
        dispatch::submit(selector, move || promise.start());
        coroutine
    }

    pub(crate) fn build<F>(
        self,
        future: F,
        owner: Option<Arc<dyn LatentOwner>>,
    ) -> Coroutine<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        let frame = Box::pin(async move {
            let value = future.await;
            *slot.lock().unwrap() = Some(value);
        });
        Coroutine {
            promise: Promise::new(frame, self.name, owner),
            result,
        }
    }
}

pub fn spawn<F>(future: F) -> Coroutine<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Builder::new().spawn(future)
}

pub fn spawn_on<F>(selector: ThreadSelector, future: F) -> Coroutine<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Builder::new().spawn_on(selector, future)
}
