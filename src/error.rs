//! Errors surfaced synchronously to callers.
//!
//! Everything that can be recovered from inside a running capture (transport
//! hiccups, body-fetch failures, redaction timeouts, size-cap hits) is a log
//! record, not a variant here -- see [`crate::logger`]. Only invalid usage,
//! invalid configuration, and explicit cancellation get a typed error.

use har_types::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture session already started")]
    AlreadyStarted,

    #[error("capture session was never started")]
    NotStarted,

    #[error("capture session has been disposed")]
    Disposed,

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to open output file {path}: {source}")]
    OutputFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
