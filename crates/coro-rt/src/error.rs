// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime errors.
//!
//! Two families live here. Recoverable API misuse (bad configuration, double
//! initialization, unknown pool names) is reported through `RuntimeError`.
//! Broken runtime invariants go through `fatal!`, which logs and panics:
//! there is nothing sensible to do after a double resume.

use thiserror::Error;

/// Errors returned by the public runtime API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `runtime::init` was called after the runtime was already running.
    #[error("runtime is already initialized")]
    AlreadyInitialized,

    /// A second thread tried to become the primary thread.
    #[error("primary thread is already bound to `{0}`")]
    PrimaryAlreadyBound(String),

    /// A pool name that was never registered.
    #[error("unknown worker pool `{0}`")]
    UnknownPool(String),

    /// A pool with this name already exists.
    #[error("worker pool `{0}` is already registered")]
    DuplicatePool(String),

    /// A latent action with the same owner and uuid is still running.
    #[error("latent action {uuid} is already running for this owner")]
    DuplicateAction { uuid: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed environment variable.
    #[error("invalid value `{value}` for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("pool `{0}` must have at least one thread")]
    EmptyPool(String),
}

/// Halt on a broken runtime invariant.
///
/// Logs at `error` so the message reaches the configured subscriber, then
/// panics. Never used for conditions a caller could handle.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        ::tracing::error!(target: "coro_rt::fatal", "{}", message);
        panic!("{}", message)
    }};
}

/// `fatal!` unless the condition holds.
#[macro_export]
macro_rules! verify {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal!($($arg)+);
        }
    };
}
