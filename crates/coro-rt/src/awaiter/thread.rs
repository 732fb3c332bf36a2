// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread-affinity awaiters.

use super::{Await, Awaiter};
use crate::dispatch::{ThreadOptions, ThreadSelector};
use crate::promise::Resumer;

/// Continue on a thread matching a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveToThread {
    selector: ThreadSelector,
}

impl MoveToThread {
    pub fn selector(&self) -> ThreadSelector {
        self.selector
    }
}

impl Awaiter for MoveToThread {
    type Output = ();

    fn ready(&mut self) -> bool {
        self.selector.matches_current()
    }

    fn suspend(&mut self, resumer: Resumer) {
        resumer.resume_on(self.selector);
    }

    fn resume(&mut self) {}
}

pub fn move_to_thread(selector: ThreadSelector) -> Await<MoveToThread> {
    Await::new(MoveToThread { selector })
}

pub fn move_to_primary() -> Await<MoveToThread> {
    move_to_thread(ThreadSelector::Primary)
}

/// Come back to the kind of thread this was called on, after hopping away.
pub fn move_to_similar_thread() -> Await<MoveToThread> {
    move_to_thread(ThreadSelector::current())
}

/// Continue on a brand-new thread. Every await spawns another one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveToNewThread {
    options: ThreadOptions,
}

impl Awaiter for MoveToNewThread {
    type Output = ();

    fn ready(&mut self) -> bool {
        false
    }

    fn suspend(&mut self, resumer: Resumer) {
        resumer.resume_on_new_thread(self.options.clone());
    }

    fn resume(&mut self) {}
}

pub fn move_to_new_thread(options: ThreadOptions) -> Await<MoveToNewThread> {
    Await::new(MoveToNewThread { options })
}

/// Give the thread up and continue on the same kind of thread later.
#[derive(Debug, Clone, Copy, Default)]
pub struct Yield;

impl Awaiter for Yield {
    type Output = ();

    fn ready(&mut self) -> bool {
        false
    }

    fn suspend(&mut self, resumer: Resumer) {
        resumer.resume_on(ThreadSelector::current());
    }

    fn resume(&mut self) {}
}

pub fn yield_now() -> Await<Yield> {
    Await::new(Yield)
}
