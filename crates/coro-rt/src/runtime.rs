// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Process-wide runtime instance.
//!
//! `init` installs an explicit configuration. Anything that needs the
//! runtime before that initializes it from the environment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::error::RuntimeError;
use crate::logging::init_logging;

pub struct Runtime {
    config: RuntimeConfig,
    dispatcher: Dispatcher,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    fn new(config: RuntimeConfig) -> Self {
        init_logging(&config.log);
        let dispatcher = Dispatcher::new(&config);
        tracing::debug!(
            worker_threads = config.effective_worker_threads(),
            pools = config.pools.len(),
            "runtime started"
        );
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Start the runtime with `config`. Fails if it is already running,
/// including when it was lazily started by an earlier call.
pub fn init(config: RuntimeConfig) -> Result<&'static Runtime, RuntimeError> {
    let created = AtomicBool::new(false);
    let runtime = RUNTIME.get_or_init(|| {
        created.store(true, Ordering::Relaxed);
        Runtime::new(config)
    });
    if created.load(Ordering::Relaxed) {
        Ok(runtime)
    } else {
        Err(RuntimeError::AlreadyInitialized)
    }
}

/// The running runtime, started from the environment if needed.
pub fn get() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let config = RuntimeConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!("ignoring runtime environment: {err}");
            RuntimeConfig::default()
        });
        Runtime::new(config)
    })
}

pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_after_start_is_rejected() {
        let _ = get();
        assert!(is_initialized());
        assert!(matches!(
            init(RuntimeConfig::default()),
            Err(RuntimeError::AlreadyInitialized)
        ));
    }
}
