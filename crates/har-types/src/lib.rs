//! HAR 1.2 document model, capture configuration, and validation.
//!
//! This crate is the pure-data layer shared by the capture engine and its
//! tests: no IO, no async, nothing transport-specific.

pub mod har;
pub mod options;
pub mod validate;

pub use har::*;
pub use options::{CaptureTypes, Options, ResponseBodyScope};
pub use validate::{ValidationError, Violation, validate};
