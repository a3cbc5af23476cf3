//! Transport adapter contract (C6) -- the engine's one abstraction over
//! CDP-backed and fallback transports. Concrete CDP wiring lives outside
//! this crate; a factory elsewhere picks an implementation and the engine
//! only ever sees this trait.

use async_trait::async_trait;

/// Events the core subscribes to, each carrying the transport-scoped
/// request-id they pertain to.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    RequestWillBeSent {
        request_id: String,
        method: String,
        url: String,
        headers: Vec<(String, String)>,
        cookies: Vec<(String, String)>,
        query_string: Vec<(String, String)>,
        post_data: Option<(String, String)>,
        started_date_time: String,
        initiator: Option<serde_json::Value>,
        resource_type: Option<String>,
        /// Present when this request is the continuation of a redirect;
        /// carries the prior hop's response fields.
        redirect_response: Option<RedirectResponse>,
    },
    ResponseReceived {
        request_id: String,
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
        cookies: Vec<(String, String)>,
        mime_type: String,
        from_disk_cache: bool,
        from_service_worker: bool,
        timings: Option<TransportTimings>,
        total_time_ms: f64,
    },
    LoadingFinished {
        request_id: String,
    },
    LoadingFailed {
        request_id: String,
        error: String,
    },
    WsCreated {
        request_id: String,
        url: String,
        timestamp: f64,
        wall_time: String,
    },
    WsHandshakeRequest {
        request_id: String,
        headers: Vec<(String, String)>,
    },
    WsHandshakeResponse {
        request_id: String,
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
    },
    WsFrameSent {
        request_id: String,
        timestamp: f64,
        opcode: u8,
        data: String,
    },
    WsFrameReceived {
        request_id: String,
        timestamp: f64,
        opcode: u8,
        data: String,
    },
    WsClosed {
        request_id: String,
    },
    DomContentEventFired {
        timestamp_ms: f64,
    },
    LoadEventFired {
        timestamp_ms: f64,
    },
}

#[derive(Debug, Clone)]
pub struct RedirectResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
pub struct TransportTimings {
    pub blocked: Option<f64>,
    pub dns: Option<f64>,
    pub connect: Option<f64>,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
    pub ssl: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
#[error("adapter error: {0}")]
pub struct AdapterError(pub String);

/// A retrieved response body.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub text: String,
    pub base64_encoded: bool,
}

/// The core's one abstraction over a concrete transport. Implementations
/// choose how events actually arrive (CDP session, polling, or -- for
/// tests -- direct injection); the engine never names the concrete type.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn enable_network(&self) -> Result<(), AdapterError>;
    async fn disable_network(&self) -> Result<(), AdapterError>;
    async fn enable_page(&self) -> Result<(), AdapterError>;
    async fn disable_page(&self) -> Result<(), AdapterError>;
    async fn get_response_body(&self, request_id: &str) -> Result<ResponseBody, AdapterError>;
}
