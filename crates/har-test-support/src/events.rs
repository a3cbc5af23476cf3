//! Builders for common [`AdapterEvent`] sequences, so integration tests read
//! as scenarios instead of field-by-field struct literals.

use har_capture::adapter::{AdapterEvent, RedirectResponse, TransportTimings};

pub fn default_timings() -> TransportTimings {
    TransportTimings {
        blocked: Some(0.0),
        dns: None,
        connect: None,
        send: 1.0,
        wait: 10.0,
        receive: 2.0,
        ssl: None,
    }
}

/// A request/response pair with a 200 and the given MIME type, with no
/// redirect and no cache signal.
pub fn simple_exchange(request_id: &str, url: &str, mime_type: &str) -> Vec<AdapterEvent> {
    vec![
        AdapterEvent::RequestWillBeSent {
            request_id: request_id.to_owned(),
            method: "GET".to_owned(),
            url: url.to_owned(),
            headers: vec![("accept".to_owned(), "*/*".to_owned())],
            cookies: vec![],
            query_string: vec![],
            post_data: None,
            started_date_time: "2026-01-01T00:00:00.000000+00:00".to_owned(),
            initiator: None,
            resource_type: Some("document".to_owned()),
            redirect_response: None,
        },
        AdapterEvent::ResponseReceived {
            request_id: request_id.to_owned(),
            status: 200,
            status_text: "OK".to_owned(),
            headers: vec![("content-type".to_owned(), mime_type.to_owned())],
            cookies: vec![],
            mime_type: mime_type.to_owned(),
            from_disk_cache: false,
            from_service_worker: false,
            timings: Some(default_timings()),
            total_time_ms: 13.0,
        },
        AdapterEvent::LoadingFinished {
            request_id: request_id.to_owned(),
        },
    ]
}

/// A 301 hop followed by the final 200, both under the same transport
/// request-id -- CDP reuses one `requestId` across an entire redirect chain,
/// with the hop's response folded into the continuation's
/// `redirect_response` field rather than a `response-received` of its own.
pub fn redirect_chain(request_id: &str, from_url: &str, to_url: &str) -> Vec<AdapterEvent> {
    let mut events = vec![AdapterEvent::RequestWillBeSent {
        request_id: request_id.to_owned(),
        method: "GET".to_owned(),
        url: from_url.to_owned(),
        headers: vec![],
        cookies: vec![],
        query_string: vec![],
        post_data: None,
        started_date_time: "2026-01-01T00:00:00.000000+00:00".to_owned(),
        initiator: None,
        resource_type: Some("document".to_owned()),
        redirect_response: None,
    }];

    events.push(AdapterEvent::RequestWillBeSent {
        request_id: request_id.to_owned(),
        method: "GET".to_owned(),
        url: to_url.to_owned(),
        headers: vec![],
        cookies: vec![],
        query_string: vec![],
        post_data: None,
        started_date_time: "2026-01-01T00:00:00.050000+00:00".to_owned(),
        initiator: None,
        resource_type: Some("document".to_owned()),
        redirect_response: Some(RedirectResponse {
            status: 301,
            status_text: "Moved Permanently".to_owned(),
            headers: vec![("location".to_owned(), to_url.to_owned())],
        }),
    });

    events.extend(simple_exchange(request_id, to_url, "text/html"));
    events
}

/// A full WebSocket lifecycle: creation, handshake, two frames, close.
pub fn websocket_session(request_id: &str, url: &str) -> Vec<AdapterEvent> {
    vec![
        AdapterEvent::WsCreated {
            request_id: request_id.to_owned(),
            url: url.to_owned(),
            timestamp: 0.0,
            wall_time: "2026-01-01T00:00:00.000000+00:00".to_owned(),
        },
        AdapterEvent::WsHandshakeRequest {
            request_id: request_id.to_owned(),
            headers: vec![("upgrade".to_owned(), "websocket".to_owned())],
        },
        AdapterEvent::WsHandshakeResponse {
            request_id: request_id.to_owned(),
            status: 101,
            status_text: "Switching Protocols".to_owned(),
            headers: vec![("upgrade".to_owned(), "websocket".to_owned())],
        },
        AdapterEvent::WsFrameSent {
            request_id: request_id.to_owned(),
            timestamp: 0.1,
            opcode: 1,
            data: "hello".to_owned(),
        },
        AdapterEvent::WsFrameReceived {
            request_id: request_id.to_owned(),
            timestamp: 0.2,
            opcode: 1,
            data: "world".to_owned(),
        },
        AdapterEvent::WsClosed {
            request_id: request_id.to_owned(),
        },
    ]
}
