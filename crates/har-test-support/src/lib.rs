//! Shared test support for the capture engine: an in-process [`Adapter`]
//! double and builders for common event sequences.

pub mod events;
pub mod fake_adapter;

pub use fake_adapter::{CallLog, FakeAdapter};
