//! WebSocket frame accumulation (C4).

use crate::redact::Redactor;
use chrono::DateTime;
use har_types::har::{
    CacheState, Content, Entry, Request, Response, Timings, WebSocketMessage, WsMessageDirection,
};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

struct WsConnection {
    url: String,
    handshake_timestamp: f64,
    handshake_wall_time: String,
    request_headers: Vec<(String, String)>,
    response_status: u16,
    response_status_text: String,
    response_headers: Vec<(String, String)>,
    frames: VecDeque<WebSocketMessage>,
}

/// Per-connection WebSocket state, keyed by transport request-id. Suppresses
/// normal HTTP request/response handling for the ids it owns.
pub struct WsAccumulator {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsAccumulator {
    pub fn new() -> Self {
        WsAccumulator {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn on_created(&self, id: &str, url: &str, timestamp: f64, wall_time: String) {
        self.connections.write().expect("ws lock poisoned").insert(
            id.to_owned(),
            WsConnection {
                url: url.to_owned(),
                handshake_timestamp: timestamp,
                handshake_wall_time: wall_time,
                request_headers: Vec::new(),
                response_status: 0,
                response_status_text: String::new(),
                response_headers: Vec::new(),
                frames: VecDeque::new(),
            },
        );
    }

    pub fn on_handshake_request(&self, id: &str, headers: Vec<(String, String)>) {
        if let Some(conn) = self.connections.write().expect("ws lock poisoned").get_mut(id) {
            conn.request_headers = headers;
        }
    }

    pub fn on_handshake_response(
        &self,
        id: &str,
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
    ) {
        if let Some(conn) = self.connections.write().expect("ws lock poisoned").get_mut(id) {
            conn.response_status = status;
            conn.response_status_text = status_text;
            conn.response_headers = headers;
        }
    }

    /// Computes wall-clock time as `handshake_wall_epoch + (ts -
    /// handshake_ts)`, applies body redaction if configured, and enforces
    /// `max_frames` with an oldest-drop policy. `handshake_wall_time` is an
    /// ISO 8601 string (the same clock `started_date_time` uses elsewhere);
    /// `timestamp` is the transport's monotonic clock, shared with
    /// `handshake_timestamp`.
    pub fn add_frame(
        &self,
        id: &str,
        direction: WsMessageDirection,
        timestamp: f64,
        opcode: u8,
        data: String,
        max_frames: usize,
        redactor: Option<&Redactor>,
    ) -> bool {
        let mut connections = self.connections.write().expect("ws lock poisoned");
        let Some(conn) = connections.get_mut(id) else {
            return false;
        };

        let offset_secs = timestamp - conn.handshake_timestamp;
        let wall_base = wall_time_to_epoch_seconds(&conn.handshake_wall_time)
            .unwrap_or(conn.handshake_timestamp);
        let time = wall_base + offset_secs;

        let data = match redactor {
            Some(r) if r.has_body_patterns() => r.redact_frame(&data),
            _ => data,
        };

        if max_frames > 0 && conn.frames.len() >= max_frames {
            conn.frames.pop_front();
        }
        conn.frames.push_back(WebSocketMessage {
            direction,
            time,
            opcode,
            data,
        });
        true
    }

    pub fn is_websocket(&self, id: &str) -> bool {
        self.connections.read().expect("ws lock poisoned").contains_key(id)
    }

    /// Removes the connection and returns a synthesized base entry (status
    /// 101, `x-unknown` MIME, HTTP/1.1) plus the frame list sorted by `time`
    /// ascending.
    pub fn flush(&self, id: &str) -> Option<Entry> {
        let conn = self.connections.write().expect("ws lock poisoned").remove(id)?;
        let mut frames: Vec<WebSocketMessage> = conn.frames.into_iter().collect();
        frames.sort_by(|a, b| a.time.total_cmp(&b.time));

        let headers = |pairs: Vec<(String, String)>| {
            pairs
                .into_iter()
                .map(|(name, value)| har_types::har::HeaderEntry { name, value })
                .collect::<Vec<_>>()
        };

        Some(Entry {
            started_date_time: conn.handshake_wall_time,
            time: 0.0,
            request: Request {
                method: "GET".to_owned(),
                url: conn.url,
                http_version: "HTTP/1.1".to_owned(),
                cookies: vec![],
                headers: headers(conn.request_headers),
                query_string: vec![],
                post_data: None,
                headers_size: -1,
                body_size: 0,
            },
            response: Response {
                status: if conn.response_status == 0 { 101 } else { conn.response_status },
                status_text: if conn.response_status_text.is_empty() {
                    "Switching Protocols".to_owned()
                } else {
                    conn.response_status_text
                },
                http_version: "HTTP/1.1".to_owned(),
                cookies: vec![],
                headers: headers(conn.response_headers),
                content: Content {
                    size: 0,
                    mime_type: "x-unknown".to_owned(),
                    text: None,
                    encoding: None,
                },
                redirect_url: String::new(),
                headers_size: -1,
                body_size: 0,
            },
            cache: CacheState::default(),
            timings: Timings::empty(),
            pageref: None,
            server_ip_address: None,
            connection: None,
            comment: None,
            resource_type: Some("websocket".to_owned()),
            websocket_messages: Some(frames),
            initiator: None,
            security_details: None,
            request_body_size: None,
            response_body_size: None,
        })
    }
}

impl Default for WsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn wall_time_to_epoch_seconds(wall_time: &str) -> Option<f64> {
    let dt = DateTime::parse_from_rfc3339(wall_time).ok()?;
    Some(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_frame_dropped_once_cap_reached() {
        let ws = WsAccumulator::new();
        ws.on_created("1", "wss://example.com/socket", 0.0, "0".to_owned());

        ws.add_frame("1", WsMessageDirection::Send, 0.0, 1, "f1".to_owned(), 2, None);
        ws.add_frame("1", WsMessageDirection::Receive, 1.0, 1, "f2".to_owned(), 2, None);
        ws.add_frame("1", WsMessageDirection::Send, 2.0, 1, "f3".to_owned(), 2, None);

        let entry = ws.flush("1").unwrap();
        let frames = entry.websocket_messages.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "f2");
        assert_eq!(frames[1].data, "f3");
    }

    #[test]
    fn flush_sorts_frames_by_time_ascending() {
        let ws = WsAccumulator::new();
        ws.on_created("1", "wss://example.com", 10.0, "10".to_owned());
        ws.add_frame("1", WsMessageDirection::Send, 12.0, 1, "later".to_owned(), 0, None);
        ws.add_frame("1", WsMessageDirection::Receive, 10.5, 1, "earlier".to_owned(), 0, None);

        let entry = ws.flush("1").unwrap();
        let frames = entry.websocket_messages.unwrap();
        assert_eq!(frames[0].data, "earlier");
        assert_eq!(frames[1].data, "later");
    }

    #[test]
    fn flush_produces_synthesized_101_entry() {
        let ws = WsAccumulator::new();
        ws.on_created("1", "wss://example.com", 0.0, "0".to_owned());
        let entry = ws.flush("1").unwrap();
        assert_eq!(entry.response.status, 101);
        assert_eq!(entry.response.content.mime_type, "x-unknown");
    }

    #[test]
    fn is_websocket_tracks_lifecycle() {
        let ws = WsAccumulator::new();
        assert!(!ws.is_websocket("1"));
        ws.on_created("1", "wss://example.com", 0.0, "0".to_owned());
        assert!(ws.is_websocket("1"));
        ws.flush("1");
        assert!(!ws.is_websocket("1"));
    }

    #[test]
    fn frame_time_is_anchored_to_iso8601_handshake_wall_time() {
        let ws = WsAccumulator::new();
        ws.on_created("1", "wss://example.com", 5.0, "2026-01-01T00:00:00+00:00".to_owned());
        ws.add_frame("1", WsMessageDirection::Send, 7.5, 1, "f".to_owned(), 0, None);

        let entry = ws.flush("1").unwrap();
        let frame = &entry.websocket_messages.unwrap()[0];
        assert_eq!(frame.time, 1_767_225_602.5);
    }
}
