//! Top-level, non-zone-specific configuration.
//!
//! Per-zone refresh policy (masters, timer bounds, transfer strategy, serial
//! policy, and so on) lives in [`crate::zonemaintenance::config`] instead,
//! since it is loaded and reloaded independently per zone.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

//----------- LogLevel -----------------------------------------------------

/// A severity level for logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// A function or variable was interacted with, for debugging.
    Trace,

    /// Something occurred that may be relevant to debugging.
    Debug,

    /// Things are proceeding as expected.
    Info,

    /// Something does not appear to be correct.
    Warning,

    /// Something is wrong (but the engine can recover).
    Error,

    /// Something is wrong and the engine can't function at all.
    Critical,
}

impl LogLevel {
    /// Represent a [`LogLevel`] as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//----------- LogTarget -----------------------------------------------------

/// Where log messages are sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Append to a file at the given path.
    File(PathBuf),

    /// Send to the local syslog daemon, per [RFC 3164].
    ///
    /// [RFC 3164]: https://www.rfc-editor.org/rfc/rfc3164
    Syslog,

    /// Write to standard output.
    Stdout,

    /// Write to standard error.
    Stderr,
}

impl Default for LogTarget {
    fn default() -> Self {
        Self::Stderr
    }
}

//----------- LoggingConfig -------------------------------------------------

/// Configuration for the [`crate::log`] subsystem.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The minimum severity of messages to log.
    pub level: LogLevel,

    /// Where to send log messages.
    pub target: LogTarget,

    /// Extra `tracing` directives, e.g. `zonemaintenance::ixfr=trace`.
    ///
    /// These are layered on top of `level` and let an operator raise the
    /// verbosity of a single module without changing the global level.
    pub trace_targets: Vec<String>,
}
