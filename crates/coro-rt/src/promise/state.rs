// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution-mode state and its transition table.
//!
//! Every transition is a single compare-and-swap on an `AtomicU8`. The CAS
//! results are the only ordering between "runtime wants to resume" and
//! "owner wants to destroy".

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Plain coroutine with no external owner.
    Running = 0,
    /// Managed coroutine running on, or suspended for, the primary thread.
    ManagedRunning = 1,
    /// Managed coroutine handed to another thread.
    DetachedRunning = 2,
    /// Managed coroutine destroyed by cancellation or teardown.
    Canceled = 3,
    /// Teardown arrived while detached; destroy when control comes back.
    DeferredDestroy = 4,
    /// Managed body returned.
    Done = 5,
}

impl ExecutionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::ManagedRunning,
            2 => Self::DetachedRunning,
            3 => Self::Canceled,
            4 => Self::DeferredDestroy,
            5 => Self::Done,
            _ => unreachable!("invalid execution state {v}"),
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Canceled | Self::Done)
    }
}

/// What a dispatched resumption should do after consulting the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    /// Go ahead and resume.
    Resume,
    /// Teardown won; destroy the frame on the primary thread.
    Destroy,
    /// Already finished; the resumption is abandoned.
    Finished,
}

/// How owner teardown proceeds after consulting the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Detached; whoever holds the coroutine destroys it when it comes back.
    Deferred,
    /// Claimed for the caller, who destroys the frame now.
    DestroyNow,
    /// Already finished.
    Finished,
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: ExecutionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> ExecutionState {
        ExecutionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn cas(&self, from: ExecutionState, to: ExecutionState) -> Result<(), ExecutionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ExecutionState::from_u8)
    }

    /// A thread-affinity awaiter or timer is about to hand the coroutine to
    /// another thread.
    pub fn begin_detach(&self) {
        match self.cas(ExecutionState::ManagedRunning, ExecutionState::DetachedRunning) {
            Ok(())
            | Err(ExecutionState::Running)
            | Err(ExecutionState::DetachedRunning)
            | Err(ExecutionState::DeferredDestroy) => {}
            Err(other) => crate::fatal!("cannot detach a coroutine in state {other:?}"),
        }
    }

    /// A resumption landed on the primary thread.
    pub fn reattach(&self) -> Handoff {
        match self.cas(ExecutionState::DetachedRunning, ExecutionState::ManagedRunning) {
            Ok(()) | Err(ExecutionState::ManagedRunning) | Err(ExecutionState::Running) => {
                Handoff::Resume
            }
            Err(ExecutionState::DeferredDestroy) => Handoff::Destroy,
            Err(_) => Handoff::Finished,
        }
    }

    /// A resumption landed off the primary thread. A managed coroutine
    /// running there counts as detached so teardown defers to it.
    pub fn detach_for_resume(&self) -> Handoff {
        match self.cas(ExecutionState::ManagedRunning, ExecutionState::DetachedRunning) {
            Ok(()) | Err(ExecutionState::DetachedRunning) | Err(ExecutionState::Running) => {
                Handoff::Resume
            }
            Err(ExecutionState::DeferredDestroy) => Handoff::Destroy,
            Err(_) => Handoff::Finished,
        }
    }

    /// Owner teardown. A managed coroutine that is not detached is moved to
    /// `Canceled` here, so a resumption racing in from another thread
    /// observes `Finished` instead of running a segment.
    pub fn request_destroy(&self) -> Teardown {
        loop {
            match self.cas(ExecutionState::DetachedRunning, ExecutionState::DeferredDestroy) {
                Ok(()) | Err(ExecutionState::DeferredDestroy) => return Teardown::Deferred,
                Err(ExecutionState::ManagedRunning) => {
                    match self.cas(ExecutionState::ManagedRunning, ExecutionState::Canceled) {
                        Ok(()) => return Teardown::DestroyNow,
                        // Detached in between; go round again.
                        Err(_) => continue,
                    }
                }
                Err(ExecutionState::Running) => return Teardown::DestroyNow,
                Err(_) => return Teardown::Finished,
            }
        }
    }

    /// Terminal transition; later transitions observe a finished state.
    pub fn finish(&self, state: ExecutionState) {
        debug_assert!(state.is_finished());
        self.0.store(state as u8, Ordering::Release);
    }
}
