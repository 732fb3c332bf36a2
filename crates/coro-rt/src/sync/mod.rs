// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine synchronization primitives.
//!
//! Both primitives keep their state and waiter list under one
//! `parking_lot` mutex. The readiness check locks it and, when the
//! coroutine has to wait, the guard travels inside the awaiter until the
//! waiter is registered, so no trigger or release can slip in between.
//! Resumers are always invoked with the lock released.

mod event;
mod semaphore;
mod waiters;

pub use event::{Event, EventAwaiter};
pub use semaphore::{Semaphore, SemaphoreAwaiter};
