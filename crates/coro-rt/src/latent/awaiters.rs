// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Awaiters polled by the latent action manager once per tick.
//!
//! Only managed coroutines on the primary thread may use them.

use std::fmt;
use std::time::{Duration, Instant};

use crate::awaiter::{Await, Awaiter};
use crate::dispatch::is_primary_thread;
use crate::promise::Resumer;

pub(crate) enum LatentCondition {
    /// Ticks left before resuming.
    Ticks(u32),
    Until(Box<dyn FnMut() -> bool + Send + 'static>),
    Deadline(Instant),
}

impl LatentCondition {
    fn satisfied_now(&mut self) -> bool {
        match self {
            LatentCondition::Ticks(n) => *n == 0,
            LatentCondition::Until(predicate) => predicate(),
            LatentCondition::Deadline(deadline) => Instant::now() >= *deadline,
        }
    }

    /// Advance by one tick.
    fn tick(&mut self) -> bool {
        match self {
            LatentCondition::Ticks(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            other => other.satisfied_now(),
        }
    }
}

impl fmt::Debug for LatentCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatentCondition::Ticks(n) => write!(f, "Ticks({n})"),
            LatentCondition::Until(_) => f.write_str("Until(..)"),
            LatentCondition::Deadline(at) => write!(f, "Deadline({at:?})"),
        }
    }
}

/// A suspended managed coroutine waiting for its condition.
pub(crate) struct LatentWait {
    resumer: Resumer,
    condition: LatentCondition,
}

impl LatentWait {
    pub fn tick(&mut self) -> bool {
        self.condition.tick()
    }

    pub fn into_resumer(self) -> Resumer {
        self.resumer
    }

    pub fn discard(self) {
        self.resumer.abandon();
    }
}

#[derive(Debug)]
pub struct LatentAwaiter {
    condition: Option<LatentCondition>,
}

impl Awaiter for LatentAwaiter {
    type Output = ();

    fn ready(&mut self) -> bool {
        match self.condition.as_mut() {
            Some(condition) => condition.satisfied_now(),
            None => true,
        }
    }

    fn suspend(&mut self, resumer: Resumer) {
        let promise = resumer.promise().clone();
        if !promise.is_managed() {
            crate::fatal!("latent awaiter used outside a managed coroutine");
        }
        crate::verify!(
            is_primary_thread(),
            "latent awaiter used off the primary thread"
        );
        let Some(condition) = self.condition.take() else {
            crate::fatal!("latent awaiter suspended twice");
        };
        *promise.latent_wait() = Some(LatentWait { resumer, condition });
    }

    fn resume(&mut self) {}
}

fn latent(condition: LatentCondition) -> Await<LatentAwaiter> {
    Await::new(LatentAwaiter {
        condition: Some(condition),
    })
}

/// Resume on the next latent tick.
pub fn next_tick() -> Await<LatentAwaiter> {
    ticks(1)
}

/// Resume after `n` latent ticks. Zero does not suspend.
pub fn ticks(n: u32) -> Await<LatentAwaiter> {
    latent(LatentCondition::Ticks(n))
}

/// Resume on the first tick where `predicate` holds. Checked once before
/// suspending, then once per tick.
pub fn until(predicate: impl FnMut() -> bool + Send + 'static) -> Await<LatentAwaiter> {
    latent(LatentCondition::Until(Box::new(predicate)))
}

/// Resume on the first tick at least `duration` from now.
pub fn seconds(duration: Duration) -> Await<LatentAwaiter> {
    latent(LatentCondition::Deadline(Instant::now() + duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counts_down() {
        let mut c = LatentCondition::Ticks(2);
        assert!(!c.satisfied_now());
        assert!(!c.tick());
        assert!(c.tick());
    }

    #[test]
    fn predicate_is_rechecked_each_tick() {
        let mut calls = 0;
        let mut c = LatentCondition::Until(Box::new(move || {
            calls += 1;
            calls >= 3
        }));
        assert!(!c.satisfied_now());
        assert!(!c.tick());
        assert!(c.tick());
    }

    #[test]
    fn elapsed_deadline_is_satisfied() {
        let mut c = LatentCondition::Deadline(Instant::now());
        assert!(c.satisfied_now());
        assert_eq!(format!("{:?}", LatentCondition::Ticks(4)), "Ticks(4)");
    }
}
