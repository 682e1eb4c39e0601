//! Unified error handling.
//!
//! A `thiserror`-based model with:
//!   * Typed variants for the failure domains of a discovery run
//!   * A categorization layer (`ErrorCategory`) for summaries & exit codes
//!   * Helper constructors
//!   * `From` conversions for common lower-level errors
//!
//! Propagation rules:
//!   * Only `Input` errors are fatal at start-up (invalid target, invalid
//!     configuration, zero usable sources).
//!   * `Source` errors are recorded against the source that produced them
//!     and never abort a run. Per-candidate DNS and HTTP failures are typed
//!     by the resolver and prober and stay on the validation result.
//!   * A cancelled run is not a failure; `Cancelled` only carries the
//!     partial-completion exit code.
//!
//! Usage:
//!   use subsweep::errors::{Result, SweepError, ErrorCategory};
//!
//!   fn do_something() -> Result<()> {
//!       Err(SweepError::Configuration { message: "invalid mode".into() })
//!   }
//!
//! NOTE: Variants that wrap external errors retain sources to preserve backtraces
//!       (when RUST_BACKTRACE=1).

use std::io;

use thiserror::Error;

use crate::deadline::CancelReason;

/// High-level classification for summaries / exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Source,
    Cancelled,
    Io,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Source => "source",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Io => "io",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Primary application error type.
#[derive(Error, Debug)]
pub enum SweepError {
    // ------------------------ Input / Validation ----------------------------
    #[error("Invalid target domain '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("No discovery sources available: {reason}")]
    NoSourcesAvailable { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ----------------------------- Sources ----------------------------------
    #[error("Source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("Source {source_id} failed: {reason}")]
    SourceFailed { source_id: String, reason: String },

    #[error("Source {source_id} exceeded its {seconds}s budget and was terminated")]
    SourceTimeout { source_id: String, seconds: u64 },

    // ------------------------------ Run -------------------------------------
    #[error("Run {reason}; partial results emitted")]
    Cancelled { reason: CancelReason },

    // ----------------------------- I/O / FS ---------------------------------
    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        path: String,
        operation: String,
        #[source]
        source: io::Error,
    },

    // ---------------------------- Internal ----------------------------------
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SweepError {
    /// Categorize the error for summaries / exit codes.
    pub fn category(&self) -> ErrorCategory {
        use SweepError::*;
        match self {
            InvalidTarget { .. }
            | NoSourcesAvailable { .. }
            | Configuration { .. } => ErrorCategory::Input,

            SourceUnavailable { .. } | SourceFailed { .. } | SourceTimeout { .. } => {
                ErrorCategory::Source
            }

            Cancelled { .. } => ErrorCategory::Cancelled,

            Io { .. } => ErrorCategory::Io,
            Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Process exit code: 2 when no source is usable, 3 for a cancelled run.
    pub fn exit_code(&self) -> i32 {
        match self {
            SweepError::NoSourcesAvailable { .. } => 2,
            SweepError::Cancelled { .. } => 3,
            _ => 1,
        }
    }

    // ---------------------------- Constructors -----------------------------

    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn no_sources(reason: impl Into<String>) -> Self {
        Self::NoSourcesAvailable {
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn source_unavailable(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn source_failed(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceFailed {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn source_timeout(source_id: impl Into<String>, seconds: u64) -> Self {
        Self::SourceTimeout {
            source_id: source_id.into(),
            seconds,
        }
    }

    pub fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled { reason }
    }

    pub fn io(path: impl Into<String>, operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Public result alias.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Map standard IO errors into `Io` variant (generic context).
impl From<io::Error> for SweepError {
    fn from(e: io::Error) -> Self {
        SweepError::Io {
            path: "<unknown>".into(),
            operation: "unspecified".into(),
            source: e,
        }
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(e: serde_json::Error) -> Self {
        SweepError::internal_with("JSON serialization failed", e)
    }
}

/// Extension trait for enriching IO results with path + operation context.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<String>, operation: impl Into<String>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn with_path(self, path: impl Into<String>, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| SweepError::io(path.into(), operation.into(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(
            SweepError::invalid_target("x", "bad").category(),
            ErrorCategory::Input
        );
        assert_eq!(
            SweepError::source_timeout("amass", 600).category(),
            ErrorCategory::Source
        );
        assert_eq!(
            SweepError::cancelled(CancelReason::Interrupted).category(),
            ErrorCategory::Cancelled
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(SweepError::invalid_target("x", "bad").exit_code(), 1);
        assert_eq!(SweepError::no_sources("none installed").exit_code(), 2);
        assert_eq!(SweepError::cancelled(CancelReason::Deadline).exit_code(), 3);
    }

    #[test]
    fn display_snippets() {
        let e = SweepError::source_unavailable("subfinder", "not found in PATH");
        let s = e.to_string();
        assert!(s.contains("subfinder"));
        assert!(s.contains("PATH"));
        let c = SweepError::cancelled(CancelReason::Deadline);
        assert!(c.to_string().contains("deadline reached"));
        let i = SweepError::internal("boom");
        assert!(i.to_string().contains("Internal error"));
    }

    #[test]
    fn io_context() {
        let res: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"));
        let mapped = res.with_path("/tmp/out", "create_dir");
        match mapped.err().unwrap() {
            SweepError::Io {
                path, operation, ..
            } => {
                assert_eq!(path, "/tmp/out");
                assert_eq!(operation, "create_dir");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
