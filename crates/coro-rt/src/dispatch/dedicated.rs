// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot dedicated threads.
//!
//! The thread runs its callback and exits. Joining it is itself dispatched
//! to a worker from the exiting thread, so neither the submitter nor the
//! dedicated thread ever blocks on the join.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::{run_job, set_current_class, submit, Job, ThreadClass, ThreadSelector};

/// Scheduling priority of a dedicated thread. Mapped to nice values on
/// Linux; raising priority usually needs privileges and is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

impl ThreadPriority {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    fn nice(self) -> i32 {
        match self {
            ThreadPriority::Lowest => 10,
            ThreadPriority::BelowNormal => 5,
            ThreadPriority::Normal => 0,
            ThreadPriority::AboveNormal => -5,
            ThreadPriority::Highest => -10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    pub name: String,
    /// `None` uses the platform default.
    pub stack_size: Option<usize>,
    pub priority: ThreadPriority,
    /// Bit `n` allows CPU `n`. `None` leaves affinity alone.
    pub affinity: Option<u64>,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            name: "coro-dedicated".to_string(),
            stack_size: None,
            priority: ThreadPriority::Normal,
            affinity: None,
        }
    }
}

impl ThreadOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn affinity(mut self, mask: u64) -> Self {
        self.affinity = Some(mask);
        self
    }
}

type HandleSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Run `f` on a new thread configured by `options`.
pub fn spawn_dedicated(options: ThreadOptions, f: impl FnOnce() + Send + 'static) {
    let job: Job = Box::new(f);
    let slot: HandleSlot = Arc::new(Mutex::new(None));

    let mut builder = thread::Builder::new().name(options.name.clone());
    if let Some(bytes) = options.stack_size {
        builder = builder.stack_size(bytes);
    }

    let thread_slot = slot.clone();
    let priority = options.priority;
    let affinity = options.affinity;
    let spawned = builder.spawn(move || {
        set_current_class(ThreadClass::Dedicated);
        apply_priority(priority);
        if let Some(mask) = affinity {
            apply_affinity(mask);
        }
        run_job(job);
        submit(ThreadSelector::AnyWorker, move || reap(thread_slot));
    });

    match spawned {
        Ok(handle) => *slot.lock().unwrap() = Some(handle),
        Err(err) => crate::fatal!("failed to spawn dedicated thread `{}`: {err}", options.name),
    }
}

/// Join a finished dedicated thread. The handle may not be published yet
/// if the thread outran its spawner; try again later in that case.
fn reap(slot: HandleSlot) {
    let handle = slot.lock().unwrap().take();
    match handle {
        Some(handle) => {
            let _ = handle.join();
        }
        None => submit(ThreadSelector::AnyWorker, move || reap(slot)),
    }
}

#[cfg(target_os = "linux")]
fn apply_priority(priority: ThreadPriority) {
    if priority == ThreadPriority::Normal {
        return;
    }
    // SAFETY: gettid has no preconditions; setpriority only reads its arguments.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, priority.nice())
    };
    if rc != 0 {
        tracing::warn!(
            ?priority,
            "could not set thread priority: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(target_os = "linux")]
fn apply_affinity(mask: u64) {
    // SAFETY: cpu_set_t is plain data; the set outlives the call.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        for cpu in 0..64 {
            if mask & (1u64 << cpu) != 0 {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        tracing::warn!(
            mask = format_args!("{mask:#x}"),
            "could not set thread affinity: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(priority: ThreadPriority) {
    if priority != ThreadPriority::Normal {
        tracing::warn!(?priority, "thread priority is not supported on this platform");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_affinity(mask: u64) {
    tracing::warn!(mask, "thread affinity is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::current_class;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_once_on_a_named_dedicated_thread() {
        let (tx, rx) = mpsc::channel();
        spawn_dedicated(ThreadOptions::named("dedicated-test"), move || {
            tx.send((
                thread::current().name().map(str::to_string),
                current_class(),
                ThreadSelector::current(),
            ))
            .unwrap();
        });
        let (name, class, selector) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("dedicated-test"));
        assert_eq!(class, ThreadClass::Dedicated);
        assert_eq!(selector, ThreadSelector::AnyWorker);
    }

    #[test]
    fn options_builder_sets_fields() {
        let opts = ThreadOptions::named("x")
            .stack_size(1 << 20)
            .priority(ThreadPriority::Lowest)
            .affinity(0b1);
        assert_eq!(opts.stack_size, Some(1 << 20));
        assert_eq!(opts.priority, ThreadPriority::Lowest);
        assert_eq!(opts.affinity, Some(1));
    }

    #[test]
    fn lowered_priority_and_affinity_still_run() {
        let (tx, rx) = mpsc::channel();
        let opts = ThreadOptions::named("dedicated-low")
            .priority(ThreadPriority::Lowest)
            .affinity(u64::MAX);
        spawn_dedicated(opts, move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
