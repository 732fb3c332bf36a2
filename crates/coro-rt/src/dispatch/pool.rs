// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fixed-size worker pools.
//!
//! Each pool owns one shared queue. Workers park on the queue's condvar
//! when idle. Pools are registered for the life of the process, so workers
//! never exit and every submitted job runs.

use std::sync::Arc;
use std::thread;

use super::queue::JobQueue;
use super::{run_job, set_current_class, Job, PoolId, ThreadClass};

pub(crate) struct WorkerPool {
    id: PoolId,
    name: String,
    queue: Arc<JobQueue>,
}

impl WorkerPool {
    /// Start `threads` workers named `{prefix}-{name}-{i}`.
    pub fn start(id: PoolId, name: &str, threads: usize, prefix: &str) -> Arc<Self> {
        let queue = Arc::new(JobQueue::new());
        for index in 0..threads {
            let queue = queue.clone();
            let spawned = thread::Builder::new()
                .name(format!("{prefix}-{name}-{index}"))
                .spawn(move || worker_loop(id, &queue));
            if let Err(err) = spawned {
                crate::fatal!("failed to spawn worker thread for pool `{name}`: {err}");
            }
        }
        tracing::debug!(pool = name, threads, "worker pool started");
        Arc::new(Self {
            id,
            name: name.to_string(),
            queue,
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submit(&self, job: Job) {
        self.queue.push(job);
    }
}

fn worker_loop(id: PoolId, queue: &JobQueue) {
    set_current_class(ThreadClass::Worker(id));
    loop {
        run_job(queue.pop_blocking());
    }
}
