//! An in-process [`Adapter`] double. Tests register canned response bodies
//! (or failures, or artificial delays) keyed by request-id, then feed
//! [`AdapterEvent`]s straight into a [`Session`](har_capture::Session)
//! without any real transport in the loop.

use async_trait::async_trait;
use har_capture::adapter::{Adapter, AdapterError, ResponseBody};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone)]
enum Canned {
    Body { text: String, base64_encoded: bool, delay: Duration },
    Error(String),
}

/// Records every call the engine makes so tests can assert on adapter-side
/// behavior (e.g. that a cached URL is fetched only once).
#[derive(Default)]
pub struct CallLog {
    pub enable_network: usize,
    pub disable_network: usize,
    pub enable_page: usize,
    pub disable_page: usize,
    pub get_response_body: Vec<String>,
}

pub struct FakeAdapter {
    responses: Mutex<HashMap<String, Canned>>,
    calls: Mutex<CallLog>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        FakeAdapter {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(CallLog::default()),
        }
    }

    /// Registers a plain-text body to be returned for `request_id`.
    pub fn set_body(&self, request_id: &str, text: impl Into<String>) {
        self.responses.lock().unwrap().insert(
            request_id.to_owned(),
            Canned::Body {
                text: text.into(),
                base64_encoded: false,
                delay: Duration::ZERO,
            },
        );
    }

    /// Registers a base64-encoded body.
    pub fn set_base64_body(&self, request_id: &str, base64_text: impl Into<String>) {
        self.responses.lock().unwrap().insert(
            request_id.to_owned(),
            Canned::Body {
                text: base64_text.into(),
                base64_encoded: true,
                delay: Duration::ZERO,
            },
        );
    }

    /// Registers a body that only resolves after `delay` -- for exercising
    /// the body pipeline's drain timeout.
    pub fn set_slow_body(&self, request_id: &str, text: impl Into<String>, delay: Duration) {
        self.responses.lock().unwrap().insert(
            request_id.to_owned(),
            Canned::Body {
                text: text.into(),
                base64_encoded: false,
                delay,
            },
        );
    }

    /// Makes `get_response_body` fail for `request_id`.
    pub fn set_error(&self, request_id: &str, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(request_id.to_owned(), Canned::Error(message.into()));
    }

    pub fn calls_snapshot(&self) -> (usize, usize, usize, usize, Vec<String>) {
        let calls = self.calls.lock().unwrap();
        (
            calls.enable_network,
            calls.disable_network,
            calls.enable_page,
            calls.disable_page,
            calls.get_response_body.clone(),
        )
    }
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    async fn enable_network(&self) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().enable_network += 1;
        Ok(())
    }

    async fn disable_network(&self) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().disable_network += 1;
        Ok(())
    }

    async fn enable_page(&self) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().enable_page += 1;
        Ok(())
    }

    async fn disable_page(&self) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().disable_page += 1;
        Ok(())
    }

    async fn get_response_body(&self, request_id: &str) -> Result<ResponseBody, AdapterError> {
        self.calls.lock().unwrap().get_response_body.push(request_id.to_owned());

        let canned = self.responses.lock().unwrap().get(request_id).cloned();
        match canned {
            Some(Canned::Body { text, base64_encoded, delay }) => {
                if delay > Duration::ZERO {
                    sleep(delay).await;
                }
                Ok(ResponseBody { text, base64_encoded })
            }
            Some(Canned::Error(message)) => Err(AdapterError(message)),
            None => Err(AdapterError(format!("no canned body for request {request_id}"))),
        }
    }
}
