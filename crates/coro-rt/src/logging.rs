// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Logging setup.
//!
//! The runtime only emits `tracing` events. Hosts that already install a
//! subscriber need nothing from this module; everyone else can call
//! `init_logging` once at startup.

use std::env;
use std::fmt;

use serde::Deserialize;

/// Output format for runtime log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

/// Log configuration, usually part of `RuntimeConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Text,
        level: LogLevel::Warn,
    };

    /// Defaults overridden by `CORO_LOG_FORMAT` / `CORO_LOG_LEVEL`.
    #[must_use]
    pub fn from_env() -> Self {
        let format = env::var("CORO_LOG_FORMAT").ok();
        let level = env::var("CORO_LOG_LEVEL").ok();
        apply_env_overrides(Self::DEFAULT, format.as_deref(), level.as_deref())
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn apply_env_overrides(
    mut options: LogOptions,
    format: Option<&str>,
    level: Option<&str>,
) -> LogOptions {
    if let Some(value) = format.and_then(LogFormat::parse) {
        options.format = value;
    }
    if let Some(value) = level.and_then(LogLevel::parse) {
        options.level = value;
    }
    options
}

/// Install a global `tracing` subscriber. Later calls are ignored, as is a
/// subscriber the host installed first.
pub fn init_logging(options: &LogOptions) {
    use std::io::IsTerminal;
    use std::sync::OnceLock;
    use tracing_subscriber::{fmt, EnvFilter};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let use_ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);

        let _ = match options.format {
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
            LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_level_parse_expected_values() {
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);

        assert_eq!(LogLevel::parse("err"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn env_overrides_replace_only_valid_fields() {
        let opts = apply_env_overrides(LogOptions::DEFAULT, Some("json"), Some("nonsense"));
        assert_eq!(opts.format, LogFormat::Json);
        assert_eq!(opts.level, LogOptions::DEFAULT.level);
    }

    #[test]
    fn options_deserialize_from_lowercase_names() {
        let opts: LogOptions = serde_json::from_str(r#"{"level":"debug"}"#).unwrap();
        assert_eq!(opts.level, LogLevel::Debug);
        assert_eq!(opts.format, LogFormat::Text);
    }

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(&LogOptions::DEFAULT);
        init_logging(&LogOptions {
            format: LogFormat::Json,
            level: LogLevel::Trace,
        });
    }
}
