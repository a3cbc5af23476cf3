//! Browser HTTP(S)/WebSocket traffic capture to HAR 1.2.
//!
//! The engine never talks to a browser directly: it consumes
//! [`adapter::AdapterEvent`]s pushed in by a transport-specific
//! [`adapter::Adapter`] implementation (CDP-backed or otherwise) and turns
//! them into a HAR document, either held in memory or streamed
//! incrementally to disk.
//!
//! A [`Session`] is the only entry point callers need: construct one with
//! an [`Options`] and an `Arc<dyn Adapter>`, `start` it, feed it events,
//! and `stop` it to finalize the document.

pub mod adapter;
pub mod body;
pub mod correlator;
pub mod error;
pub mod logger;
pub mod matchers;
pub mod redact;
pub mod session;
pub mod writer;
pub mod ws;

pub use adapter::{Adapter, AdapterError, AdapterEvent, RedirectResponse, ResponseBody, TransportTimings};
pub use error::CaptureError;
pub use har_types::{CaptureTypes, Options, ResponseBodyScope, ValidationError};
pub use logger::{Level, Logger, LoggerHandle, Record, TracingLogger};
pub use session::{EntryWritten, EntryWrittenCallback, Session};
pub use tokio_util::sync::CancellationToken;
