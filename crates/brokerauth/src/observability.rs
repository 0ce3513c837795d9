// Tracing initialization with a configurable and reloadable log level.
use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Verbosity accepted by the `log_level` option.
///
/// `fatal` and `panic` are accepted for compatibility with broker
/// configurations and log at error level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl LogLevel {
    /// Filter directive for `EnvFilter`.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal | Self::Panic => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Panic => "panic",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "panic" => Ok(Self::Panic),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogDestination {
    #[default]
    Stderr,
    Stdout,
    /// Append to a file, created if missing.
    File(PathBuf),
}

/// Logging part of the settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: LogLevel,
    pub destination: LogDestination,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. A file that cannot
/// be opened falls back to stderr. Calling this twice is a no-op.
pub fn init_tracing(settings: &LoggingSettings) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(settings.level.as_filter()));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let mut file_error = None;
    let writer = match &settings.destination {
        LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogDestination::File(path) => {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
                Err(e) => {
                    file_error = Some((path.clone(), e));
                    BoxMakeWriter::new(std::io::stderr)
                }
            }
        }
    };

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(tracing_fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();

    if let Some((path, e)) = file_error {
        tracing::error!(path = %path.display(), error = %e, "failed to log to file, using default stderr");
    }
}

/// Apply a new logging level at runtime if the reload handle is configured.
pub fn apply_logging_level(level: LogLevel) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level.as_filter());
        });
    }
}
