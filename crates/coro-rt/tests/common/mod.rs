// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared setup for the integration tests: one runtime and one primary loop
//! per test binary.

#![allow(dead_code)]

use std::sync::{mpsc, OnceLock};
use std::time::Duration;

use coro_rt::dispatch::{self, PrimaryLoop, ThreadSelector};
use coro_rt::{runtime, RuntimeConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Start the runtime with a small fixed layout and a primary loop.
pub fn setup() {
    static PRIMARY: OnceLock<PrimaryLoop> = OnceLock::new();
    PRIMARY.get_or_init(|| {
        let config = RuntimeConfig::default()
            .with_worker_threads(4)
            .with_pool("io", 2);
        // Another test in this binary may have won the race.
        let _ = runtime::init(config);
        PrimaryLoop::spawn(Duration::from_millis(1)).expect("primary loop")
    });
}

/// Run `f` on the primary thread and wait for its result.
pub fn on_primary<R: Send + 'static>(f: impl FnOnce() -> R + Send + 'static) -> R {
    setup();
    let (tx, rx) = mpsc::channel();
    dispatch::submit(ThreadSelector::Primary, move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(TIMEOUT).expect("primary job did not finish")
}
