//! End-to-end capture scenarios driven entirely through the fake adapter --
//! no real browser or network involved.

use har_capture::{Options, ResponseBodyScope, Session};
use har_test_support::{events, FakeAdapter};
use std::sync::Arc;

fn adapter() -> Arc<FakeAdapter> {
    Arc::new(FakeAdapter::new())
}

#[tokio::test]
async fn simple_capture_produces_one_entry_with_body() {
    let adapter = adapter();
    adapter.set_body("1", "<html>hi</html>");

    let session = Session::new(Options::default(), adapter.clone(), None, None).unwrap();
    session.start(Some(("page_1".to_owned(), "Example".to_owned())), None).await.unwrap();

    for event in events::simple_exchange("1", "https://example.com", "text/html") {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    assert_eq!(log.entries.len(), 1);
    assert_eq!(log.entries[0].response.content.text.as_deref(), Some("<html>hi</html>"));
    assert_eq!(log.entries[0].pageref.as_deref(), Some("page_1"));
    assert_eq!(log.pages.len(), 1);
}

#[tokio::test]
async fn redirect_hop_and_final_response_both_become_entries() {
    let adapter = adapter();
    adapter.set_body("1", "ok");

    let session = Session::new(Options::default(), adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    for event in events::redirect_chain("1", "https://example.com/old", "https://example.com/new") {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    assert_eq!(log.entries.len(), 2);
    assert_eq!(log.entries[0].request.url, "https://example.com/old");
    assert_eq!(log.entries[0].response.status, 301);
    assert_eq!(log.entries[1].request.url, "https://example.com/new");
    assert_eq!(log.entries[1].response.status, 200);
}

#[tokio::test]
async fn clearing_a_capture_type_nulls_the_section_without_dropping_the_entry() {
    let adapter = adapter();
    adapter.set_body("1", "{}");

    let mut options = Options::default();
    options.capture_types -= har_capture::CaptureTypes::REQUEST_HDRS
        | har_capture::CaptureTypes::RESP_HDRS
        | har_capture::CaptureTypes::TIMINGS;

    let session = Session::new(options, adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    let mut events_list = events::simple_exchange("1", "https://example.com/api", "application/json");
    if let har_capture::AdapterEvent::RequestWillBeSent { headers, .. } = &mut events_list[0] {
        headers.push(("X-Test".to_owned(), "1".to_owned()));
    }
    for event in events_list {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    assert_eq!(log.entries.len(), 1);
    assert!(log.entries[0].request.headers.is_empty());
    assert!(log.entries[0].response.headers.is_empty());
    assert_eq!(log.entries[0].timings, har_types::har::Timings::empty());
}

#[tokio::test]
async fn url_exclude_pattern_drops_matching_entries() {
    let adapter = adapter();
    adapter.set_body("1", "<html/>");
    adapter.set_body("2", "body { color: red }");

    let mut options = Options::default();
    options.url_exclude_patterns = vec!["**/*.css".to_owned()];

    let session = Session::new(options, adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    for event in events::simple_exchange("1", "https://example.com/index.html", "text/html") {
        session.handle_event(event).await;
    }
    for event in events::simple_exchange("2", "https://example.com/style.css", "text/css") {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    assert_eq!(log.entries.len(), 1);
    assert_eq!(log.entries[0].request.url, "https://example.com/index.html");
}

#[tokio::test]
async fn sensitive_header_is_redacted_in_the_stored_entry() {
    let adapter = adapter();
    adapter.set_body("1", "{}");

    let mut options = Options::default();
    options.sensitive_headers = vec!["authorization".to_owned()];

    let session = Session::new(options, adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    let mut events_list = events::simple_exchange("1", "https://example.com/api", "application/json");
    if let har_capture::AdapterEvent::RequestWillBeSent { headers, .. } = &mut events_list[0] {
        headers.push(("Authorization".to_owned(), "Bearer secret".to_owned()));
    }
    for event in events_list {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    let auth_header = log.entries[0]
        .request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("authorization"))
        .unwrap();
    assert_eq!(auth_header.value, "[REDACTED]");
}

#[tokio::test]
async fn streaming_mode_writes_entries_to_disk_and_enforces_size_cap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.har");

    let adapter = adapter();
    for n in 0..20 {
        adapter.set_body(&n.to_string(), "x".repeat(50));
    }

    let mut options = Options::default();
    options.output_file_path = Some(path.to_str().unwrap().to_owned());
    options.max_output_file_size = 2000;
    options.response_body_scope = ResponseBodyScope::All;

    let session = Session::new(options, adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    for n in 0..20 {
        let id = n.to_string();
        for event in events::simple_exchange(&id, &format!("https://example.com/{n}"), "text/plain") {
            session.handle_event(event).await;
        }
    }

    session.stop(None).await.unwrap();

    let metadata = std::fs::metadata(&path).unwrap();
    assert!(metadata.len() <= 2000 + 512);
    let log = har_capture::writer::read_har_file(&path).unwrap();
    assert!(!log.entries.is_empty());
    assert!(log.entries.len() < 20);
}

#[tokio::test]
async fn websocket_frames_are_captured_as_a_single_entry() {
    let adapter = adapter();
    let mut options = Options::default();
    options.capture_types |= har_capture::CaptureTypes::WEBSOCKET;

    let session = Session::new(options, adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    for event in events::websocket_session("1", "wss://example.com/socket") {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    assert_eq!(log.entries.len(), 1);
    let frames = log.entries[0].websocket_messages.as_ref().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(log.entries[0].response.status, 101);
}

#[tokio::test]
async fn paused_session_drops_entries_until_resumed() {
    // Body retrieval is disabled so entries complete synchronously inside
    // `handle_event` rather than racing the background completion drainer.
    let adapter = adapter();
    let mut options = Options::default();
    options.response_body_scope = ResponseBodyScope::None;

    let session = Session::new(options, adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();
    session.pause();

    for event in events::simple_exchange("1", "https://example.com/a", "text/plain") {
        session.handle_event(event).await;
    }

    session.resume();
    for event in events::simple_exchange("2", "https://example.com/b", "text/plain") {
        session.handle_event(event).await;
    }

    session.stop(None).await.unwrap();
    let log = session.get_har().await;

    assert_eq!(log.entries.len(), 1);
    assert_eq!(log.entries[0].request.url, "https://example.com/b");
}

#[tokio::test]
async fn stop_and_dispose_are_idempotent() {
    let adapter = adapter();
    let session = Session::new(Options::default(), adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();
    session.stop(None).await.unwrap();
    session.stop(None).await.unwrap();
    session.dispose().await;
    session.dispose().await;
}

#[tokio::test]
async fn cancelled_stop_returns_cancelled_error_without_waiting_out_the_drain() {
    let adapter = adapter();
    adapter.set_slow_body("1", "<html/>", std::time::Duration::from_secs(2));

    let session = Session::new(Options::default(), adapter, None, None).unwrap();
    session.start(None, None).await.unwrap();

    for event in events::simple_exchange("1", "https://example.com", "text/html") {
        session.handle_event(event).await;
    }

    let token = har_capture::CancellationToken::new();
    token.cancel();

    let result = session.stop(Some(&token)).await;
    assert!(matches!(result, Err(har_capture::CaptureError::Cancelled)));
}
