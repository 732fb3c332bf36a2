// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Manual- and auto-reset events.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::waiters::WaiterList;
use crate::awaiter::{Await, Awaiter};
use crate::dispatch::ThreadSelector;
use crate::promise::{CancelHook, ResumeOutcome, Resumer};

struct EventState {
    active: bool,
    waiters: WaiterList,
    next_id: u64,
}

/// A flag coroutines can wait on.
///
/// A manual-reset event stays set after `trigger` and releases every waiter
/// until `reset`. An auto-reset event releases one waiter per trigger, or
/// stays set for the next `wait` if nobody is waiting.
pub struct Event {
    state: Arc<Mutex<EventState>>,
    manual_reset: bool,
}

impl Event {
    pub fn new(manual_reset: bool, initially_set: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState {
                active: initially_set,
                waiters: WaiterList::new(),
                next_id: 0,
            })),
            manual_reset,
        }
    }

    pub fn manual_reset() -> Self {
        Self::new(true, false)
    }

    pub fn auto_reset() -> Self {
        Self::new(false, false)
    }

    pub fn is_manual_reset(&self) -> bool {
        self.manual_reset
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().active
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn trigger(&self) {
        if self.manual_reset {
            let waiters = {
                let mut state = self.state.lock();
                state.active = true;
                state.waiters.take_all()
            };
            for resumer in waiters {
                resumer.resume();
            }
            return;
        }

        loop {
            let resumer = {
                let mut state = self.state.lock();
                match state.waiters.pop_front() {
                    Some(resumer) => resumer,
                    None => {
                        state.active = true;
                        return;
                    }
                }
            };
            if resumer.resume() == ResumeOutcome::Resumed {
                return;
            }
            // The waiter was torn down first; the trigger goes to the next one.
        }
    }

    pub fn reset(&self) {
        self.state.lock().active = false;
    }

    pub fn wait(&self) -> Await<EventAwaiter<'_>> {
        Await::new(EventAwaiter {
            event: self,
            guard: None,
        })
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::auto_reset()
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let waiting = self.state.lock().waiters.len();
        if waiting > 0 && !std::thread::panicking() {
            tracing::error!(waiting, "event dropped with suspended waiters");
            debug_assert!(false, "event dropped with {waiting} suspended waiters");
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Event")
            .field("manual_reset", &self.manual_reset)
            .field("active", &state.active)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Suspension point for `Event::wait`. Keeps the event locked from the
/// readiness check until the waiter is registered.
pub struct EventAwaiter<'a> {
    event: &'a Event,
    guard: Option<MutexGuard<'a, EventState>>,
}

impl Awaiter for EventAwaiter<'_> {
    type Output = ();

    fn ready(&mut self) -> bool {
        let mut state = self.event.state.lock();
        if state.active {
            if !self.event.manual_reset {
                state.active = false;
            }
            return true;
        }
        self.guard = Some(state);
        false
    }

    fn suspend(&mut self, resumer: Resumer) {
        let Some(mut state) = self.guard.take() else {
            crate::fatal!("event awaiter suspended without a readiness check");
        };
        let id = state.next_id;
        state.next_id += 1;

        let shared = self.event.state.clone();
        resumer.promise().set_cancel_hook(CancelHook::new(
            ThreadSelector::current(),
            move || shared.lock().waiters.remove(id),
        ));
        state.waiters.push_back(id, resumer);
        drop(state);
    }

    fn resume(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn waiter_is_resumed_by_trigger() {
        let event = Arc::new(Event::auto_reset());
        let e = event.clone();
        let co = coroutine::spawn(async move {
            e.wait().await;
            "woken"
        });
        assert!(!co.is_done());
        assert_eq!(event.waiter_count(), 1);
        event.trigger();
        assert_eq!(co.take_result(), Some("woken"));
        assert!(!event.is_set());
    }

    #[test]
    fn manual_reset_stays_set_until_reset() {
        let event = Arc::new(Event::manual_reset());
        assert!(event.is_manual_reset());
        event.trigger();
        for _ in 0..3 {
            let e = event.clone();
            let co = coroutine::spawn(async move { e.wait().await });
            assert!(co.is_done());
            assert_eq!(co.suspension_count(), 0);
        }
        event.reset();
        let e = event.clone();
        let co = coroutine::spawn(async move { e.wait().await });
        assert!(!co.is_done());
        event.trigger();
        assert!(co.is_done());
    }

    #[test]
    fn manual_trigger_releases_every_waiter() {
        let event = Arc::new(Event::manual_reset());
        let woken = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let e = event.clone();
            let w = woken.clone();
            coroutine::spawn(async move {
                e.wait().await;
                w.fetch_add(1, Ordering::SeqCst);
            });
        }
        event.trigger();
        assert_eq!(woken.load(Ordering::SeqCst), 4);
        assert!(event.is_set());
    }

    #[test]
    fn auto_reset_wakes_one_waiter_per_trigger() {
        let event = Arc::new(Event::auto_reset());
        let woken = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let e = event.clone();
            let w = woken.clone();
            coroutine::spawn(async move {
                e.wait().await;
                w.fetch_add(1, Ordering::SeqCst);
            });
        }
        event.trigger();
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        event.trigger();
        assert_eq!(woken.load(Ordering::SeqCst), 2);
        // No waiters left: the third trigger is remembered, then consumed.
        event.trigger();
        assert!(event.is_set());
        let e = event.clone();
        let co = coroutine::spawn(async move { e.wait().await });
        assert!(co.is_done());
        assert!(!event.is_set());
    }

    #[test]
    fn canceled_waiter_is_unlinked() {
        let event = Arc::new(Event::auto_reset());
        let e = event.clone();
        let co = coroutine::spawn(async move { e.wait().await });
        assert_eq!(event.waiter_count(), 1);
        co.cancel();
        assert!(co.wait_for(Duration::from_secs(5)));
        assert_eq!(event.waiter_count(), 0);
        // The trigger is not swallowed by the canceled coroutine.
        event.trigger();
        assert!(event.is_set());
    }

    #[test]
    fn trigger_racing_registration_is_never_lost() {
        for _ in 0..50 {
            let event = Arc::new(Event::manual_reset());
            let waiters: Vec<_> = (0..8)
                .map(|_| {
                    let e = event.clone();
                    coroutine::spawn_on(ThreadSelector::AnyWorker, async move { e.wait().await })
                })
                .collect();
            let trigger = {
                let e = event.clone();
                std::thread::spawn(move || e.trigger())
            };
            trigger.join().unwrap();
            for waiter in &waiters {
                assert!(waiter.wait_for(Duration::from_secs(10)));
            }
            assert_eq!(event.waiter_count(), 0);
        }
    }

    #[test]
    fn auto_trigger_racing_one_waiter_wakes_it() {
        for _ in 0..100 {
            let event = Arc::new(Event::auto_reset());
            let e = event.clone();
            let co = coroutine::spawn_on(ThreadSelector::AnyWorker, async move { e.wait().await });
            let e = event.clone();
            std::thread::spawn(move || e.trigger()).join().unwrap();
            assert!(co.wait_for(Duration::from_secs(10)));
            // Whichever side won, the single trigger was consumed exactly once.
            assert!(!event.is_set());
        }
    }

    #[test]
    fn woken_waiter_can_wait_again_during_trigger() {
        let event = Arc::new(Event::auto_reset());
        let e = event.clone();
        let co = coroutine::spawn(async move {
            e.wait().await;
            // Runs inside the first trigger call.
            e.wait().await;
        });
        event.trigger();
        assert!(!co.is_done());
        assert_eq!(event.waiter_count(), 1);
        assert!(!event.is_set());
        event.trigger();
        assert!(co.is_done());
        assert_eq!(co.suspension_count(), 2);
    }

    #[test]
    fn manual_waiter_resetting_inside_trigger_waits_again() {
        let event = Arc::new(Event::manual_reset());
        let e = event.clone();
        let co = coroutine::spawn(async move {
            e.wait().await;
            e.reset();
            e.wait().await;
        });
        event.trigger();
        assert!(!co.is_done());
        assert_eq!(event.waiter_count(), 1);
        event.trigger();
        assert!(co.is_done());
    }

    #[test]
    #[should_panic(expected = "suspended waiters")]
    #[cfg(debug_assertions)]
    fn dropping_with_waiters_is_diagnosed() {
        let promise = crate::promise::Promise::new(Box::pin(async {}), None, None);
        let event = Event::auto_reset();
        {
            let mut awaiter = EventAwaiter {
                event: &event,
                guard: None,
            };
            assert!(!awaiter.ready());
            awaiter.suspend(promise.resumer());
        }
        drop(event);
    }
}
