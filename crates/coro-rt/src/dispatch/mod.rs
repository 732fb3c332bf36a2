// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread-affinity dispatch.
//!
//! `submit` runs a callback exactly once on a thread matching a
//! `ThreadSelector`: the primary thread, the default worker pool, or a
//! named pool. `spawn_dedicated` runs a callback on a fresh thread.
//!
//! Every runtime thread records its `ThreadClass` in a thread-local so
//! awaiters can ask "am I already where I need to be?" without a lookup.

mod dedicated;
mod pool;
mod primary;
mod queue;

use std::cell::Cell;
use std::sync::{Arc, RwLock};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::runtime;

pub use dedicated::{spawn_dedicated, ThreadOptions, ThreadPriority};
pub use primary::{bind_primary, is_primary_thread, pump, PrimaryLoop};

pub(crate) use pool::WorkerPool;
pub(crate) use primary::PrimaryQueue;

/// A callback queued for one execution.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a worker pool. Only the dispatcher hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(pub(crate) usize);

impl PoolId {
    /// The pool behind `ThreadSelector::AnyWorker`.
    pub const DEFAULT: PoolId = PoolId(0);
}

/// Where a dispatched callback should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSelector {
    /// The thread that called `bind_primary`.
    Primary,
    /// The default worker pool.
    AnyWorker,
    /// A specific worker pool.
    Pool(PoolId),
}

impl ThreadSelector {
    /// Selector for "a thread like this one".
    ///
    /// Threads that cannot take queued work (dedicated, timer, foreign)
    /// map to `AnyWorker`.
    pub fn current() -> Self {
        match current_class() {
            ThreadClass::Primary => ThreadSelector::Primary,
            ThreadClass::Worker(id) if id == PoolId::DEFAULT => ThreadSelector::AnyWorker,
            ThreadClass::Worker(id) => ThreadSelector::Pool(id),
            ThreadClass::Dedicated | ThreadClass::Timer | ThreadClass::Foreign => {
                ThreadSelector::AnyWorker
            }
        }
    }

    /// Whether the calling thread already satisfies this selector.
    /// `AnyWorker` is satisfied by a thread of any pool.
    pub fn matches_current(self) -> bool {
        match (self, current_class()) {
            (ThreadSelector::Primary, ThreadClass::Primary) => true,
            (ThreadSelector::AnyWorker, ThreadClass::Worker(_)) => true,
            (ThreadSelector::Pool(want), ThreadClass::Worker(have)) => want == have,
            _ => false,
        }
    }
}

/// What kind of thread the caller is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadClass {
    /// Not created by the runtime and not bound as primary.
    Foreign,
    Primary,
    Worker(PoolId),
    Dedicated,
    Timer,
}

thread_local! {
    static THREAD_CLASS: Cell<ThreadClass> = const { Cell::new(ThreadClass::Foreign) };
}

pub fn current_class() -> ThreadClass {
    THREAD_CLASS.with(Cell::get)
}

pub(crate) fn set_current_class(class: ThreadClass) {
    THREAD_CLASS.with(|c| c.set(class));
}

/// Queue `f` to run once on a thread matching `selector`.
pub fn submit(selector: ThreadSelector, f: impl FnOnce() + Send + 'static) {
    runtime::get().dispatcher().submit(selector, Box::new(f));
}

/// Look up a pool registered by name.
pub fn pool(name: &str) -> Result<PoolId, RuntimeError> {
    runtime::get().dispatcher().pool_id(name)
}

/// Start a new named pool.
pub fn register_pool(name: &str, threads: usize) -> Result<PoolId, RuntimeError> {
    runtime::get().dispatcher().register_pool(name, threads)
}

/// The pool called `name`, started with `threads` threads if missing.
pub fn ensure_pool(name: &str, threads: usize) -> PoolId {
    runtime::get().dispatcher().ensure_pool(name, threads)
}

/// Run a queued job, keeping the thread alive if it panics.
pub(crate) fn run_job(job: Job) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        tracing::error!(
            thread = std::thread::current().name().unwrap_or("<unnamed>"),
            "dispatched job panicked: {}",
            crate::promise::panic_message(payload.as_ref())
        );
    }
}

/// Owner of every queue work can be submitted to.
pub(crate) struct Dispatcher {
    pools: RwLock<Vec<Arc<WorkerPool>>>,
    primary: PrimaryQueue,
    prefix: String,
}

impl Dispatcher {
    pub fn new(config: &RuntimeConfig) -> Self {
        let prefix = config.thread_name_prefix.clone();
        let default_pool = WorkerPool::start(
            PoolId::DEFAULT,
            "workers",
            config.effective_worker_threads(),
            &prefix,
        );
        let dispatcher = Self {
            pools: RwLock::new(vec![default_pool]),
            primary: PrimaryQueue::new(),
            prefix,
        };
        for pool in &config.pools {
            // Names were validated with the config; a duplicate keeps the first.
            if let Err(err) = dispatcher.register_pool(&pool.name, pool.threads) {
                tracing::warn!("skipping configured pool: {err}");
            }
        }
        dispatcher
    }

    pub fn submit(&self, selector: ThreadSelector, job: Job) {
        match selector {
            ThreadSelector::Primary => self.primary.push(job),
            ThreadSelector::AnyWorker => self.worker_pool(PoolId::DEFAULT).submit(job),
            ThreadSelector::Pool(id) => self.worker_pool(id).submit(job),
        }
    }

    fn worker_pool(&self, id: PoolId) -> Arc<WorkerPool> {
        match self.pools.read().unwrap().get(id.0) {
            Some(pool) => pool.clone(),
            None => crate::fatal!("dispatch to unknown pool id {}", id.0),
        }
    }

    pub fn pool_id(&self, name: &str) -> Result<PoolId, RuntimeError> {
        self.pools
            .read()
            .unwrap()
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.id())
            .ok_or_else(|| RuntimeError::UnknownPool(name.to_string()))
    }

    pub fn register_pool(&self, name: &str, threads: usize) -> Result<PoolId, RuntimeError> {
        let mut pools = self.pools.write().unwrap();
        if pools.iter().any(|p| p.name() == name) {
            return Err(RuntimeError::DuplicatePool(name.to_string()));
        }
        let id = PoolId(pools.len());
        pools.push(WorkerPool::start(id, name, threads.max(1), &self.prefix));
        tracing::debug!(pool = name, threads, "registered worker pool");
        Ok(id)
    }

    pub fn ensure_pool(&self, name: &str, threads: usize) -> PoolId {
        match self.register_pool(name, threads) {
            Ok(id) => id,
            Err(_) => {
                // Lost the race or already present; either way it exists now.
                match self.pool_id(name) {
                    Ok(id) => id,
                    Err(err) => crate::fatal!("pool lookup failed after registration: {err}"),
                }
            }
        }
    }

    pub fn primary(&self) -> &PrimaryQueue {
        &self.primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn foreign_thread_maps_to_any_worker() {
        std::thread::spawn(|| {
            assert_eq!(current_class(), ThreadClass::Foreign);
            assert_eq!(ThreadSelector::current(), ThreadSelector::AnyWorker);
            assert!(!ThreadSelector::AnyWorker.matches_current());
            assert!(!ThreadSelector::Primary.matches_current());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn submit_to_any_worker_runs_on_a_worker() {
        let (tx, rx) = mpsc::channel();
        submit(ThreadSelector::AnyWorker, move || {
            tx.send((current_class(), ThreadSelector::current())).unwrap();
        });
        let (class, selector) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(class, ThreadClass::Worker(PoolId::DEFAULT));
        assert_eq!(selector, ThreadSelector::AnyWorker);
    }

    #[test]
    fn submit_to_primary_runs_on_primary() {
        test_support::primary();
        let (tx, rx) = mpsc::channel();
        submit(ThreadSelector::Primary, move || {
            tx.send(is_primary_thread()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn named_pools_are_registered_once() {
        let id = ensure_pool("dispatch-test", 2);
        assert_eq!(pool("dispatch-test").unwrap(), id);
        assert_eq!(ensure_pool("dispatch-test", 5), id);
        assert!(matches!(
            register_pool("dispatch-test", 1),
            Err(RuntimeError::DuplicatePool(_))
        ));
        assert!(matches!(pool("no-such-pool"), Err(RuntimeError::UnknownPool(_))));

        let (tx, rx) = mpsc::channel();
        submit(ThreadSelector::Pool(id), move || {
            tx.send((
                ThreadSelector::Pool(id).matches_current(),
                ThreadSelector::AnyWorker.matches_current(),
                ThreadSelector::current(),
            ))
            .unwrap();
        });
        let (own, any, current) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(own);
        assert!(any);
        assert_eq!(current, ThreadSelector::Pool(id));
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let id = ensure_pool("dispatch-panic", 1);
        submit(ThreadSelector::Pool(id), || panic!("job failure"));
        let (tx, rx) = mpsc::channel();
        submit(ThreadSelector::Pool(id), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
