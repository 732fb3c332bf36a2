// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timer service.
//!
//! One background thread (`coro-timer`) owns a min-heap of deadlines. It
//! sleeps on a condvar until the soonest deadline or a new registration,
//! pops every due entry, releases the lock, and dispatches each entry's job
//! to the entry's selector. Jobs never run on the timer thread itself.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Instant;

use crate::dispatch::{self, set_current_class, Job, ThreadClass, ThreadSelector};

/// Registration handle for `TimerService::unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    deadline: Instant,
    /// Registration order; breaks deadline ties.
    id: u64,
    selector: ThreadSelector,
    job: Job,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.cmp(&other.id))
    }
}

struct TimerState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_id: u64,
}

pub struct TimerService {
    state: Mutex<TimerState>,
    signal: Condvar,
}

static SERVICE: OnceLock<&'static TimerService> = OnceLock::new();

impl TimerService {
    /// The process-wide service, starting its thread on first use.
    pub fn global() -> &'static TimerService {
        SERVICE.get_or_init(|| {
            let service: &'static TimerService = Box::leak(Box::new(TimerService {
                state: Mutex::new(TimerState {
                    heap: BinaryHeap::new(),
                    next_id: 0,
                }),
                signal: Condvar::new(),
            }));
            let spawned = thread::Builder::new()
                .name("coro-timer".to_string())
                .spawn(move || service.run());
            if let Err(err) = spawned {
                crate::fatal!("failed to spawn timer thread: {err}");
            }
            service
        })
    }

    /// Run `job` on `selector` once `deadline` has passed.
    pub fn register(
        &self,
        deadline: Instant,
        selector: ThreadSelector,
        job: impl FnOnce() + Send + 'static,
    ) -> TimerId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.heap.push(Reverse(TimerEntry {
            deadline,
            id,
            selector,
            job: Box::new(job),
        }));
        drop(state);
        self.signal.notify_one();
        tracing::trace!(timer = id, ?selector, "timer registered");
        TimerId(id)
    }

    /// Remove a pending entry. False if it already fired or was removed.
    pub fn unregister(&self, id: TimerId) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.heap.len();
        state.heap.retain(|Reverse(entry)| entry.id != id.0);
        let removed = state.heap.len() != before;
        if removed {
            tracing::trace!(timer = id.0, "timer unregistered");
        }
        removed
    }

    /// Entries still waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    fn run(&self) {
        set_current_class(ThreadClass::Timer);
        let mut state = self.state.lock().unwrap();
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            while state
                .heap
                .peek()
                .is_some_and(|Reverse(entry)| entry.deadline <= now)
            {
                if let Some(Reverse(entry)) = state.heap.pop() {
                    due.push(entry);
                }
            }

            if !due.is_empty() {
                drop(state);
                for entry in due {
                    tracing::trace!(timer = entry.id, selector = ?entry.selector, "timer fired");
                    dispatch::submit(entry.selector, entry.job);
                }
                state = self.state.lock().unwrap();
                continue;
            }

            let next = state.heap.peek().map(|Reverse(entry)| entry.deadline);
            state = match next {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    self.signal.wait_timeout(state, wait).unwrap().0
                }
                None => self.signal.wait(state).unwrap(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn entries_fire_in_deadline_order() {
        let service = TimerService::global();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        for ms in [50u64, 10, 30] {
            let tx = tx.clone();
            service.register(
                start + Duration::from_millis(ms),
                ThreadSelector::AnyWorker,
                move || tx.send(ms).unwrap(),
            );
        }
        let fired: Vec<u64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec![10, 30, 50]);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn unregistered_entry_never_fires() {
        let service = TimerService::global();
        let (tx, rx) = mpsc::channel();
        let cancelled = {
            let tx = tx.clone();
            service.register(
                Instant::now() + Duration::from_millis(20),
                ThreadSelector::AnyWorker,
                move || tx.send("cancelled").unwrap(),
            )
        };
        service.register(
            Instant::now() + Duration::from_millis(60),
            ThreadSelector::AnyWorker,
            move || tx.send("kept").unwrap(),
        );
        assert!(service.unregister(cancelled));
        assert!(!service.unregister(cancelled));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "kept");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn past_deadline_fires_promptly() {
        let (tx, rx) = mpsc::channel();
        TimerService::global().register(Instant::now(), ThreadSelector::AnyWorker, move || {
            tx.send(dispatch::current_class()).unwrap()
        });
        let class = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(class, ThreadClass::Worker(_)));
    }

    #[test]
    fn equal_deadlines_keep_registration_order() {
        let service = TimerService::global();
        let (tx, rx) = mpsc::channel();
        let deadline = Instant::now() + Duration::from_millis(15);
        let pool = dispatch::ensure_pool("timer-ties", 1);
        for i in 0..4 {
            let tx = tx.clone();
            service.register(deadline, ThreadSelector::Pool(pool), move || tx.send(i).unwrap());
        }
        let fired: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec![0, 1, 2, 3]);
    }
}
