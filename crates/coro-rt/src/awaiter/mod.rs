// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Suspension points.
//!
//! An `Awaiter` answers three questions: can the coroutine continue right
//! away (`ready`), how does it register for exactly one later resumption
//! (`suspend`), and what does the suspension point evaluate to (`resume`).
//! `Await` turns any awaiter into a future the runtime knows how to drive.

mod cancel;
mod thread;
mod time;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::promise::{Promise, Resumer};

pub use cancel::{finish_now_if_canceled, FinishNowIfCanceled};
pub use thread::{
    move_to_new_thread, move_to_primary, move_to_similar_thread, move_to_thread, yield_now,
    MoveToNewThread, MoveToThread, Yield,
};
pub use time::{wait_for, wait_until, WaitUntil};

pub trait Awaiter {
    type Output;

    /// True if the coroutine can continue without suspending.
    fn ready(&mut self) -> bool;

    /// Register `resumer` to be invoked exactly once, later.
    fn suspend(&mut self, resumer: Resumer);

    /// The value of the suspension point. Called once, after `ready`
    /// returned true or after the resumer fired.
    fn resume(&mut self) -> Self::Output;
}

/// Future adapter for an `Awaiter`. Only meaningful inside a coroutine
/// started by this runtime.
#[must_use = "awaiters do nothing unless awaited"]
pub struct Await<A> {
    awaiter: A,
    suspended: bool,
}

impl<A: Awaiter> Await<A> {
    pub fn new(awaiter: A) -> Self {
        Self {
            awaiter,
            suspended: false,
        }
    }

    pub fn get_ref(&self) -> &A {
        &self.awaiter
    }
}

/// Copies are fresh: never suspended, whatever the original's state.
impl<A: Awaiter + Clone> Clone for Await<A> {
    fn clone(&self) -> Self {
        Self::new(self.awaiter.clone())
    }
}

impl<A: Awaiter + Unpin> Future for Await<A> {
    type Output = A::Output;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<A::Output> {
        let this = self.get_mut();
        if this.suspended {
            this.suspended = false;
            return Poll::Ready(this.awaiter.resume());
        }

        let Some(promise) = Promise::current() else {
            crate::fatal!("runtime awaiter polled outside a coroutine");
        };
        // Every suspension point is a cancellation point.
        if promise.should_finish_now() {
            promise.mark_finish_now();
            return Poll::Pending;
        }
        if this.awaiter.ready() {
            return Poll::Ready(this.awaiter.resume());
        }

        let resumer = promise.resumer();
        this.suspended = true;
        this.awaiter.suspend(resumer);
        // A cancel that raced the registration finds the hook now.
        promise.fire_cancel_hook_if_due();
        Poll::Pending
    }
}
