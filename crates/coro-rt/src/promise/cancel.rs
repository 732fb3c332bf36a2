// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation.
//!
//! Cancelling only sets a flag. The coroutine observes it at its next
//! suspension or resumption point, where the frame is destroyed instead of
//! resumed. Holds taken with `cancellation_guard()` defer that until the
//! last hold is released; owner teardown ignores holds.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::Promise;

#[derive(Debug, Default)]
pub struct CancellationTracker {
    canceled: AtomicBool,
    holds: AtomicUsize,
}

impl CancellationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.holds.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let previous = self.holds.fetch_sub(1, Ordering::SeqCst);
        crate::verify!(previous > 0, "cancellation hold released more often than taken");
    }

    pub fn holds(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    /// Whether a cancellation point should act now.
    pub fn should_cancel(&self, bypass_holds: bool) -> bool {
        self.is_canceled() && (bypass_holds || self.holds() == 0)
    }
}

/// Defers cancellation of the current coroutine while alive.
#[must_use = "cancellation is only deferred while the guard is alive"]
pub struct CancellationGuard {
    promise: Promise,
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        self.promise.extras().cancellation().release();
    }
}

/// Hold off cancellation of the current coroutine until the guard drops.
pub fn cancellation_guard() -> CancellationGuard {
    let Some(promise) = Promise::current() else {
        crate::fatal!("cancellation_guard() called outside a coroutine");
    };
    promise.extras().cancellation().hold();
    CancellationGuard { promise }
}

/// Whether cancellation was requested for the running coroutine. False
/// outside a coroutine.
pub fn is_current_coroutine_canceled() -> bool {
    Promise::current().is_some_and(|p| p.extras().cancellation().is_canceled())
}

/// Runs its callback only if dropped while the frame is being destroyed by
/// cancellation or teardown. Normal completion and panics skip it.
#[must_use = "the callback runs when the guard drops"]
pub struct OnCanceled<F: FnOnce()> {
    callback: Option<F>,
}

pub fn on_canceled<F: FnOnce()>(callback: F) -> OnCanceled<F> {
    OnCanceled {
        callback: Some(callback),
    }
}

impl<F: FnOnce()> OnCanceled<F> {
    /// Drop without running the callback.
    pub fn dismiss(mut self) {
        self.callback = None;
    }
}

impl<F: FnOnce()> Drop for OnCanceled<F> {
    fn drop(&mut self) {
        if super::is_destroying() {
            if let Some(callback) = self.callback.take() {
                callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn holds_defer_cancellation() {
        let tracker = CancellationTracker::new();
        assert!(!tracker.should_cancel(false));
        tracker.hold();
        tracker.cancel();
        assert!(!tracker.should_cancel(false));
        assert!(tracker.should_cancel(true));
        tracker.release();
        assert!(tracker.should_cancel(false));
    }

    #[test]
    #[should_panic(expected = "released more often")]
    fn unbalanced_release_is_fatal() {
        CancellationTracker::new().release();
    }

    #[test]
    fn on_canceled_skips_normal_drop() {
        let ran = Cell::new(false);
        drop(on_canceled(|| ran.set(true)));
        assert!(!ran.get());
    }

    #[test]
    fn outside_a_coroutine_nothing_is_canceled() {
        assert!(!is_current_coroutine_canceled());
    }
}
