//! The HAR 1.2 document model.
//!
//! Every type here mirrors a section of the HAR 1.2 spec and serializes
//! with `camelCase` field names. Optional fields are skipped on the wire
//! when absent rather than emitted as `null`.

use serde::{Deserialize, Serialize};

/// Sentinel used for `lastAccess` on a synthesized cache-hit `beforeRequest`
/// entry (see [`CacheState::from_disk_cache`]).
pub const CACHE_LAST_ACCESS_SENTINEL: &str = "1970-01-01T00:00:00.000Z";

/// Value written into a redacted field.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub version: String,
    pub creator: Creator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<Browser>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pages: Vec<Page>,
    pub entries: Vec<Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "_custom", skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Log {
    pub fn new(creator: Creator) -> Self {
        Log {
            version: "1.2".to_owned(),
            creator,
            browser: None,
            pages: Vec::new(),
            entries: Vec::new(),
            comment: None,
            custom: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Browser {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub title: String,
    pub started_date_time: String,
    pub page_timings: PageTimings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_content_load: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_load: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub started_date_time: String,
    /// Total time of the entry in milliseconds.
    pub time: f64,
    pub request: Request,
    pub response: Response,
    pub cache: CacheState,
    pub timings: Timings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pageref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "_resourceType", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(
        rename = "_webSocketMessages",
        skip_serializing_if = "Option::is_none"
    )]
    pub websocket_messages: Option<Vec<WebSocketMessage>>,
    #[serde(rename = "_initiator", skip_serializing_if = "Option::is_none")]
    pub initiator: Option<serde_json::Value>,
    #[serde(rename = "_securityDetails", skip_serializing_if = "Option::is_none")]
    pub security_details: Option<serde_json::Value>,
    #[serde(rename = "_requestBodySize", skip_serializing_if = "Option::is_none")]
    pub request_body_size: Option<i64>,
    #[serde(rename = "_responseBodySize", skip_serializing_if = "Option::is_none")]
    pub response_body_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: String,
    pub url: String,
    pub http_version: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub query_string: Vec<QueryParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    pub content: Content,
    #[serde(default)]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub size: i64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    pub mime_type: String,
    #[serde(default)]
    pub params: Vec<PostParam>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostParam {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect: Option<f64>,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<f64>,
}

impl Timings {
    /// Timings for synthesized entries that never actually crossed the wire
    /// (e.g. a 301 captured only as a `redirectResponse`).
    pub const fn empty() -> Self {
        Timings {
            blocked: None,
            dns: None,
            connect: None,
            send: -1.0,
            wait: -1.0,
            receive: -1.0,
            ssl: None,
        }
    }

    pub fn total_ms(&self) -> f64 {
        [self.blocked, self.dns, self.connect, self.ssl]
            .into_iter()
            .flatten()
            .filter(|v| *v >= 0.0)
            .sum::<f64>()
            + self.send.max(0.0)
            + self.wait.max(0.0)
            + self.receive.max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_request: Option<CacheEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_request: Option<CacheEntry>,
}

impl CacheState {
    /// The `beforeRequest` shape the spec mandates when the transport reports
    /// `fromDiskCache`, `fromServiceWorker`, or a bare 304.
    pub fn from_disk_cache() -> Self {
        CacheState {
            before_request: Some(CacheEntry {
                expires: None,
                last_access: CACHE_LAST_ACCESS_SENTINEL.to_owned(),
                e_tag: String::new(),
                hit_count: 0,
            }),
            after_request: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub last_access: String,
    pub e_tag: String,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsMessageDirection {
    Send,
    Receive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketMessage {
    #[serde(rename = "type")]
    pub direction: WsMessageDirection,
    /// Epoch seconds, double precision.
    pub time: f64,
    pub opcode: u8,
    pub data: String,
}
