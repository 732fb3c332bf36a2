// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Awaiting several coroutines at once.
//!
//! `when_all` continues once every coroutine has finished and `when_any`
//! once the first one has. `race` is `when_any` that also cancels the
//! others as soon as one finishes. A coroutine counts as finished whatever
//! its outcome.

use std::sync::{Arc, Mutex};

use crate::awaiter::{Await, Awaiter};
use crate::coroutine::Coroutine;
use crate::dispatch::ThreadSelector;
use crate::promise::{CancelHook, ContinuationId, Promise, PromiseExtras, Resumer};

struct Shared {
    /// Completions still needed before the awaiting coroutine resumes.
    remaining: usize,
    /// Index of the first coroutine seen finishing.
    winner: Option<usize>,
    resumer: Option<Resumer>,
}

struct Aggregate {
    targets: Vec<Arc<PromiseExtras>>,
    needed: usize,
    shared: Arc<Mutex<Shared>>,
    registered: Vec<(Arc<PromiseExtras>, ContinuationId)>,
    /// Canceled once a winner is known.
    losers: Option<Arc<Vec<Promise>>>,
}

impl Aggregate {
    fn new<T>(coroutines: &[Coroutine<T>], needed: usize, cancel_losers: bool) -> Self {
        let losers: Option<Arc<Vec<Promise>>> = cancel_losers
            .then(|| Arc::new(coroutines.iter().map(|c| c.promise().clone()).collect()));
        Self {
            targets: coroutines
                .iter()
                .map(|c| c.promise().extras().clone())
                .collect(),
            needed,
            shared: Arc::new(Mutex::new(Shared {
                remaining: needed,
                winner: None,
                resumer: None,
            })),
            registered: Vec::new(),
            losers,
        }
    }

    fn ready(&mut self) -> bool {
        let done: Vec<usize> = (0..self.targets.len())
            .filter(|&i| self.targets[i].is_done())
            .collect();
        if done.len() < self.needed {
            return false;
        }
        self.shared.lock().unwrap().winner = done.first().copied();
        true
    }

    fn suspend(&mut self, resumer: Resumer) {
        let selector = ThreadSelector::current();
        let promise = resumer.promise().clone();
        self.shared.lock().unwrap().resumer = Some(resumer);

        for (index, target) in self.targets.iter().enumerate() {
            let shared = self.shared.clone();
            let losers = self.losers.clone();
            // Already-finished targets run this inline; the resumption is
            // always dispatched so it cannot land inside this segment.
            let registered = target.on_completion(move || {
                let (first, resumer) = {
                    let mut shared = shared.lock().unwrap();
                    if shared.remaining == 0 {
                        return;
                    }
                    let first = shared.winner.is_none();
                    if first {
                        shared.winner = Some(index);
                    }
                    shared.remaining -= 1;
                    let resumer = if shared.remaining == 0 {
                        shared.resumer.take()
                    } else {
                        None
                    };
                    (first, resumer)
                };
                if first {
                    if let Some(losers) = losers {
                        cancel_all_but(&losers, index);
                    }
                }
                if let Some(resumer) = resumer {
                    resumer.resume_on(selector);
                }
            });
            if let Some(id) = registered {
                self.registered.push((target.clone(), id));
            }
        }

        let registered = self.registered.clone();
        let shared = self.shared.clone();
        promise.set_cancel_hook(CancelHook::new(selector, move || {
            for (target, id) in registered {
                target.remove_continuation(id);
            }
            shared.lock().unwrap().resumer.take()
        }));
    }

    /// Unregister what has not fired and report the first finisher.
    fn finish(&mut self) -> Option<usize> {
        for (target, id) in self.registered.drain(..) {
            target.remove_continuation(id);
        }
        let winner = self.shared.lock().unwrap().winner;
        if let (Some(losers), Some(winner)) = (&self.losers, winner) {
            cancel_all_but(losers, winner);
        }
        winner
    }
}

fn cancel_all_but(promises: &[Promise], keep: usize) {
    for (index, promise) in promises.iter().enumerate() {
        if index != keep && !promise.extras().is_done() {
            promise.request_cancel();
        }
    }
}

/// Suspension point for `when_all`.
pub struct WhenAll(Aggregate);

impl Awaiter for WhenAll {
    type Output = ();

    fn ready(&mut self) -> bool {
        self.0.ready()
    }

    fn suspend(&mut self, resumer: Resumer) {
        self.0.suspend(resumer);
    }

    fn resume(&mut self) {
        self.0.finish();
    }
}

/// Suspension point for `when_any` and `race`. Evaluates to the index of
/// the coroutine that finished first.
pub struct WhenAny(Aggregate);

impl Awaiter for WhenAny {
    type Output = usize;

    fn ready(&mut self) -> bool {
        self.0.ready()
    }

    fn suspend(&mut self, resumer: Resumer) {
        self.0.suspend(resumer);
    }

    fn resume(&mut self) -> usize {
        match self.0.finish() {
            Some(winner) => winner,
            None => crate::fatal!("aggregate awaiter resumed without a finished coroutine"),
        }
    }
}

/// Continue once every coroutine in `coroutines` has finished. An empty
/// slice is ready immediately.
pub fn when_all<T>(coroutines: &[Coroutine<T>]) -> Await<WhenAll> {
    Await::new(WhenAll(Aggregate::new(coroutines, coroutines.len(), false)))
}

/// Continue once any coroutine in `coroutines` has finished; yields its
/// index. Coroutines already finished win in index order.
pub fn when_any<T>(coroutines: &[Coroutine<T>]) -> Await<WhenAny> {
    crate::verify!(!coroutines.is_empty(), "when_any over no coroutines");
    Await::new(WhenAny(Aggregate::new(coroutines, 1, false)))
}

/// Like `when_any`, and every other coroutine is canceled the moment the
/// first one finishes.
pub fn race<T>(coroutines: &[Coroutine<T>]) -> Await<WhenAny> {
    crate::verify!(!coroutines.is_empty(), "race over no coroutines");
    Await::new(WhenAny(Aggregate::new(coroutines, 1, true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awaiter::wait_for;
    use crate::coroutine::spawn;
    use crate::promise::Outcome;
    use crate::sync::Event;
    use std::time::Duration;

    fn gated(event: &Arc<Event>, value: u32) -> Coroutine<u32> {
        let e = event.clone();
        spawn(async move {
            e.wait().await;
            value
        })
    }

    #[test]
    fn when_all_waits_for_the_last() {
        let (a, b) = (Arc::new(Event::auto_reset()), Arc::new(Event::auto_reset()));
        let children = vec![gated(&a, 1), gated(&b, 2)];
        let c = children.clone();
        let parent = spawn(async move {
            when_all(&c).await;
            c.iter().map(|c| c.take_result().unwrap_or(0)).sum::<u32>()
        });
        a.trigger();
        assert!(!parent.wait_for(Duration::from_millis(30)));
        b.trigger();
        assert!(parent.wait_for(Duration::from_secs(5)));
        assert_eq!(parent.take_result(), Some(3));
    }

    #[test]
    fn when_all_of_nothing_is_ready() {
        let parent = spawn(async {
            when_all::<()>(&[]).await;
        });
        assert!(parent.is_done());
        assert_eq!(parent.suspension_count(), 0);
    }

    #[test]
    fn when_any_yields_the_first_finisher() {
        let events: Vec<_> = (0..3).map(|_| Arc::new(Event::auto_reset())).collect();
        let children: Vec<_> = events.iter().zip(0..).map(|(e, v)| gated(e, v)).collect();
        let c = children.clone();
        let parent = spawn(async move { when_any(&c).await });
        events[2].trigger();
        assert!(parent.wait_for(Duration::from_secs(5)));
        assert_eq!(parent.take_result(), Some(2));
        // The others keep running and are not canceled.
        assert!(!children[0].is_done());
        events[0].trigger();
        events[1].trigger();
        assert!(children.iter().all(|c| c.was_successful()));
    }

    #[test]
    fn when_any_prefers_the_lowest_finished_index() {
        let done: Vec<_> = (0..3).map(|v| spawn(async move { v })).collect();
        let parent = spawn(async move { when_any(&done).await });
        assert_eq!(parent.take_result(), Some(0));
        assert_eq!(parent.suspension_count(), 0);
    }

    #[test]
    fn race_cancels_the_losers() {
        let slow: Vec<_> = (0..2)
            .map(|_| spawn(async { wait_for(Duration::from_secs(30), true).await }))
            .collect();
        let fast = spawn(async { wait_for(Duration::from_millis(10), true).await });
        let mut all = slow.clone();
        all.push(fast.clone());
        let parent = spawn(async move { race(&all).await });
        assert!(parent.wait_for(Duration::from_secs(5)));
        assert_eq!(parent.take_result(), Some(2));
        assert!(fast.was_successful());
        for loser in &slow {
            assert_eq!(loser.wait(), Outcome::Canceled);
        }
    }

    #[test]
    fn canceled_aggregate_unregisters_from_targets() {
        let event = Arc::new(Event::auto_reset());
        let child = gated(&event, 5);
        let c = vec![child.clone()];
        let parent = spawn(async move { when_all(&c).await });
        parent.cancel();
        assert_eq!(parent.wait(), Outcome::Canceled);
        // Finishing the target afterwards must not touch the dead parent.
        event.trigger();
        assert_eq!(child.take_result(), Some(5));
    }

    #[test]
    #[should_panic(expected = "when_any over no coroutines")]
    fn when_any_over_nothing_is_fatal() {
        let _ = when_any::<()>(&[]);
    }
}
