// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timed waits backed by the timer service.

use std::time::{Duration, Instant};

use super::{Await, Awaiter};
use crate::dispatch::ThreadSelector;
use crate::promise::{CancelHook, Resumer, ResumerSlot};
use crate::timer::{TimerId, TimerService};

/// Wait until an instant. The target is fixed when the awaiter is created.
///
/// Cloning gives an unregistered awaiter with the same target. Dropping a
/// registered one removes its timer entry.
#[derive(Debug)]
pub struct WaitUntil {
    target: Instant,
    any_thread: bool,
    registration: Option<TimerId>,
}

impl WaitUntil {
    pub fn new(target: Instant, any_thread: bool) -> Self {
        Self {
            target,
            any_thread,
            registration: None,
        }
    }

    pub fn target(&self) -> Instant {
        self.target
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }
}

impl Clone for WaitUntil {
    fn clone(&self) -> Self {
        Self::new(self.target, self.any_thread)
    }
}

impl Awaiter for WaitUntil {
    type Output = ();

    fn ready(&mut self) -> bool {
        Instant::now() >= self.target
    }

    fn suspend(&mut self, mut resumer: Resumer) {
        if self.registration.is_some() {
            crate::fatal!("timer awaiter suspended while already registered");
        }
        // The timer thread holds the resumer from here on.
        resumer.detach();
        let selector = if self.any_thread {
            ThreadSelector::AnyWorker
        } else {
            ThreadSelector::current()
        };
        let promise = resumer.promise().clone();
        let slot = ResumerSlot::new(resumer);

        let fire = slot.clone();
        let service = TimerService::global();
        let id = service.register(self.target, selector, move || {
            if let Some(resumer) = fire.take() {
                resumer.resume();
            }
        });
        self.registration = Some(id);

        promise.set_cancel_hook(CancelHook::new(selector, move || {
            service.unregister(id);
            slot.take()
        }));
    }

    fn resume(&mut self) {
        self.registration = None;
    }
}

impl Drop for WaitUntil {
    fn drop(&mut self) {
        if let Some(id) = self.registration.take() {
            TimerService::global().unregister(id);
        }
    }
}

/// Suspend until `target`. With `any_thread` the coroutine continues on the
/// default pool, otherwise on the kind of thread it suspended on.
pub fn wait_until(target: Instant, any_thread: bool) -> Await<WaitUntil> {
    Await::new(WaitUntil::new(target, any_thread))
}

/// Suspend for `duration`, measured from this call.
pub fn wait_for(duration: Duration, any_thread: bool) -> Await<WaitUntil> {
    wait_until(Instant::now() + duration, any_thread)
}
