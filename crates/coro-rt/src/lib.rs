// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine execution runtime.
//!
//! Coroutine bodies are ordinary `async` blocks. They suspend only on the
//! runtime's awaiters, each of which hands out a one-shot `Resumer`; the
//! resumer runs the next segment on whatever thread invokes it. Awaiters
//! move execution between thread classes: a primary thread, named worker
//! pools, and dedicated threads.
//!
//! Components:
//! - dispatch: thread classes, worker pools, the primary queue
//! - timer: one service thread ordering deadlines
//! - promise: per-coroutine control block, cancellation
//! - awaiter: thread-affinity, time and cancellation awaiters
//! - sync: `Event` and `Semaphore`
//! - aggregate: waiting on several coroutines at once
//! - latent: coroutines owned by a host object and driven per tick

pub mod aggregate;
pub mod awaiter;
pub mod config;
pub mod coroutine;
pub mod dispatch;
pub mod error;
pub mod latent;
pub mod logging;
pub mod promise;
pub mod runtime;
pub mod sync;
pub mod timer;

pub use aggregate::{race, when_all, when_any};
pub use awaiter::{
    finish_now_if_canceled, move_to_new_thread, move_to_primary, move_to_similar_thread,
    move_to_thread, wait_for, wait_until, yield_now, Await, Awaiter,
};
pub use config::RuntimeConfig;
pub use coroutine::{spawn, spawn_on, Builder, Coroutine};
pub use dispatch::{ThreadOptions, ThreadPriority, ThreadSelector};
pub use error::{ConfigError, RuntimeError};
pub use promise::{
    cancellation_guard, is_current_coroutine_canceled, on_canceled, Outcome, ResumeOutcome,
    Resumer,
};
pub use sync::{Event, Semaphore};
