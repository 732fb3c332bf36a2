// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Counting semaphore.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::waiters::WaiterList;
use crate::awaiter::{Await, Awaiter};
use crate::dispatch::ThreadSelector;
use crate::promise::{CancelHook, ResumeOutcome, Resumer};

struct SemaphoreState {
    count: usize,
    waiters: WaiterList,
    next_id: u64,
}

pub struct Semaphore {
    capacity: usize,
    state: Arc<Mutex<SemaphoreState>>,
}

impl Semaphore {
    /// A semaphore with `initial` of `capacity` permits available.
    pub fn new(capacity: usize, initial: usize) -> Self {
        crate::verify!(
            capacity > 0 && initial <= capacity,
            "invalid semaphore: capacity {capacity}, initial count {initial}"
        );
        Self {
            capacity,
            state: Arc::new(Mutex::new(SemaphoreState {
                count: initial,
                waiters: WaiterList::new(),
                next_id: 0,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits available right now.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Take a permit without suspending, if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    pub fn acquire(&self) -> Await<SemaphoreAwaiter<'_>> {
        Await::new(SemaphoreAwaiter {
            semaphore: self,
            guard: None,
        })
    }

    /// Return `n` permits and hand them to waiters in order.
    pub fn release(&self, n: usize) {
        crate::verify!(n > 0, "semaphore released with a count of zero");
        let mut state = self.state.lock();
        match state.count.checked_add(n).filter(|total| *total <= self.capacity) {
            Some(total) => state.count = total,
            None => crate::fatal!(
                "semaphore over-released: count {} + {n} exceeds capacity {}",
                state.count,
                self.capacity
            ),
        }
        while state.count > 0 {
            let Some(resumer) = state.waiters.pop_front() else {
                break;
            };
            state.count -= 1;
            let outcome = MutexGuard::unlocked(&mut state, || resumer.resume());
            if outcome == ResumeOutcome::Abandoned {
                state.count += 1;
            }
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let waiting = self.state.lock().waiters.len();
        if waiting > 0 && !std::thread::panicking() {
            tracing::error!(waiting, "semaphore dropped with suspended waiters");
            debug_assert!(false, "semaphore dropped with {waiting} suspended waiters");
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("capacity", &self.capacity)
            .field("count", &state.count)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Suspension point for `Semaphore::acquire`. Keeps the semaphore locked
/// from the readiness check until the waiter is registered.
pub struct SemaphoreAwaiter<'a> {
    semaphore: &'a Semaphore,
    guard: Option<MutexGuard<'a, SemaphoreState>>,
}

impl Awaiter for SemaphoreAwaiter<'_> {
    type Output = ();

    fn ready(&mut self) -> bool {
        let mut state = self.semaphore.state.lock();
        if state.count > 0 {
            state.count -= 1;
            return true;
        }
        self.guard = Some(state);
        false
    }

    fn suspend(&mut self, resumer: Resumer) {
        let Some(mut state) = self.guard.take() else {
            crate::fatal!("semaphore awaiter suspended without a readiness check");
        };
        let id = state.next_id;
        state.next_id += 1;

        let shared = self.semaphore.state.clone();
        resumer.promise().set_cancel_hook(CancelHook::new(
            ThreadSelector::current(),
            move || shared.lock().waiters.remove(id),
        ));
        state.waiters.push_back(id, resumer);
        drop(state);
    }

    fn resume(&mut self) {}
}
