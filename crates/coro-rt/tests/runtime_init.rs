// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime startup from configuration. Runs in its own binary so the first
//! `init` here is the first in the process.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use coro_rt::dispatch::{self, ThreadSelector};
use coro_rt::timer::TimerService;
use coro_rt::{runtime, RuntimeConfig, RuntimeError};

#[test]
fn configured_runtime_starts_once_and_orders_timers() {
    let config = RuntimeConfig::from_json(
        r#"{
            "worker_threads": 2,
            "pools": [{ "name": "render", "threads": 1 }],
            "thread_name_prefix": "it"
        }"#,
    )
    .unwrap();
    let rt = runtime::init(config.clone()).unwrap();
    assert_eq!(rt.config(), &config);
    assert!(runtime::is_initialized());
    assert!(matches!(
        runtime::init(RuntimeConfig::default()),
        Err(RuntimeError::AlreadyInitialized)
    ));

    let render = dispatch::pool("render").unwrap();
    let (tx, rx) = mpsc::channel();
    submit_name(ThreadSelector::Pool(render), tx.clone());
    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(name.unwrap().starts_with("it-render-"));

    // Registered out of order, fired by deadline.
    let timer = TimerService::global();
    let now = Instant::now();
    for delay in [40u64, 10, 25] {
        let tx = tx.clone();
        timer.register(now + Duration::from_millis(delay), ThreadSelector::Pool(render), move || {
            tx.send(Some(delay.to_string())).unwrap();
        });
    }
    let fired: Vec<_> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap())
        .collect();
    assert_eq!(fired, ["10", "25", "40"]);
}

fn submit_name(selector: ThreadSelector, tx: mpsc::Sender<Option<String>>) {
    dispatch::submit(selector, move || {
        tx.send(std::thread::current().name().map(str::to_string))
            .unwrap();
    });
}
