// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! FIFO job queue shared by the threads of one pool (or the primary thread).
//!
//! A mutex-protected `VecDeque` with a condvar for parking idle consumers.
//! Queues live as long as the runtime, so nothing is ever dropped unrun.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::Job;

pub(crate) struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
        self.available.notify_one();
    }

    /// Pop one job without waiting.
    #[cfg(test)]
    pub fn pop(&self) -> Option<Job> {
        self.jobs.lock().unwrap().pop_front()
    }

    /// Pop one job, parking until one arrives.
    pub fn pop_blocking(&self) -> Job {
        let mut jobs = self.jobs.lock().unwrap();
        loop {
            if let Some(job) = jobs.pop_front() {
                return job;
            }
            jobs = self.available.wait(jobs).unwrap();
        }
    }

    /// Park until a job is queued or `timeout` passes. Spurious returns are
    /// fine; callers re-check.
    pub fn wait_for_work(&self, timeout: Duration) {
        let jobs = self.jobs.lock().unwrap();
        if jobs.is_empty() {
            let _ = self.available.wait_timeout(jobs, timeout).unwrap();
        }
    }

    /// Take everything queued right now. Jobs pushed while the batch runs
    /// wait for the next call.
    pub fn take_batch(&self) -> VecDeque<Job> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    #[test]
    fn push_pop_is_fifo() {
        let q = JobQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            q.push(Box::new(move || order.lock().unwrap().push(i)));
        }
        assert_eq!(q.len(), 3);
        while let Some(job) = q.pop() {
            job();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn take_batch_leaves_queue_empty() {
        let q = JobQueue::new();
        q.push(Box::new(|| {}));
        q.push(Box::new(|| {}));
        assert_eq!(q.take_batch().len(), 2);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn pop_blocking_wakes_on_push() {
        let q = Arc::new(JobQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        {
            let q = q.clone();
            thread::spawn(move || loop {
                q.pop_blocking()();
            });
        }

        for i in 0..5 {
            let ran = ran.clone();
            let tx = tx.clone();
            q.push(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                tx.send(i).unwrap();
            }));
        }
        let got: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn wait_for_work_times_out_when_idle() {
        let q = JobQueue::new();
        let start = std::time::Instant::now();
        q.wait_for_work(Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
