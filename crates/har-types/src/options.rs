//! Capture session configuration.
//!
//! `Options` is a plain, serializable struct -- no IO, no async. Callers
//! build one directly (its `Default` matches the table in the capture
//! spec's external-interfaces section) and pass it to the session
//! constructor, which validates it via [`crate::validate::validate`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Which HTTP fields a completed entry actually populates.
    ///
    /// An unset flag nulls out the corresponding HAR section rather than
    /// omitting the entry entirely -- e.g. clearing `RespContent` still
    /// produces an entry, just with `response.content.text` absent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CaptureTypes: u16 {
        const REQUEST_HDRS  = 1 << 0;
        const REQ_COOKIES   = 1 << 1;
        const RESP_HDRS     = 1 << 2;
        const RESP_COOKIES  = 1 << 3;
        const REQ_CONTENT   = 1 << 4;
        const RESP_CONTENT  = 1 << 5;
        const TIMINGS       = 1 << 6;
        const WEBSOCKET     = 1 << 7;
    }
}

impl Default for CaptureTypes {
    fn default() -> Self {
        CaptureTypes::REQUEST_HDRS
            | CaptureTypes::REQ_COOKIES
            | CaptureTypes::RESP_HDRS
            | CaptureTypes::RESP_COOKIES
            | CaptureTypes::REQ_CONTENT
            | CaptureTypes::RESP_CONTENT
            | CaptureTypes::TIMINGS
    }
}

/// MIME scope preset controlling which response bodies get retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseBodyScope {
    /// Never retrieve response bodies.
    None,
    /// Only documents and XHR/fetch responses.
    PagesAndApi,
    /// Every resource type, subject to `response_body_mime_filter`.
    #[default]
    All,
}

/// The full enumerated configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub capture_types: CaptureTypes,
    pub creator_name: String,
    pub force_fallback_adapter: bool,
    /// 0 means unlimited.
    pub max_response_body_size: u64,
    pub url_include_patterns: Vec<String>,
    pub url_exclude_patterns: Vec<String>,
    /// `Some` enables streaming mode (C8); `None` keeps the document in memory.
    pub output_file_path: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub response_body_scope: ResponseBodyScope,
    pub response_body_mime_filter: Vec<String>,
    pub enable_compression: bool,
    pub sensitive_headers: Vec<String>,
    pub sensitive_cookies: Vec<String>,
    pub sensitive_query_params: Vec<String>,
    pub sensitive_body_patterns: Vec<String>,
    /// 0 means unlimited; oldest frames are dropped once the cap is hit.
    pub max_ws_frames_per_connection: usize,
    /// 0 means unlimited.
    pub max_output_file_size: u64,
    pub custom_metadata: HashMap<String, serde_json::Value>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            capture_types: CaptureTypes::default(),
            creator_name: "selenium-har-capture".to_owned(),
            force_fallback_adapter: false,
            max_response_body_size: 0,
            url_include_patterns: Vec::new(),
            url_exclude_patterns: Vec::new(),
            output_file_path: None,
            browser_name: None,
            browser_version: None,
            response_body_scope: ResponseBodyScope::All,
            response_body_mime_filter: Vec::new(),
            enable_compression: false,
            sensitive_headers: Vec::new(),
            sensitive_cookies: Vec::new(),
            sensitive_query_params: Vec::new(),
            sensitive_body_patterns: Vec::new(),
            max_ws_frames_per_connection: 0,
            max_output_file_size: 0,
            custom_metadata: HashMap::new(),
        }
    }
}
