//! Capture session orchestration (C9).
//!
//! States: `idle -> capturing <-> paused -> stopped -> disposed`. The
//! session owns the correlator, WS accumulator, body pipeline, and stream
//! writer; workers and the writer talk back to it only through channels
//! set up at construction, never through back-pointers.

use crate::adapter::{Adapter, AdapterEvent};
use crate::body::{BodyJob, BodyPipeline, CompletedBody};
use crate::correlator::{CacheSignal, Correlator};
use crate::logger::{self, Level, LoggerHandle};
use crate::matchers::{MimeMatcher, UrlMatcher};
use crate::redact::Redactor;
use crate::writer::StreamWriter;
use crate::CaptureError;
use har_types::har::{Browser, Creator, Entry, Log, Page, PageTimings};
use har_types::options::CaptureTypes;
use har_types::{validate, Options};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const BODY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DISABLE_NETWORK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Capturing,
    Stopped,
    Disposed,
}

/// Fired once per accepted entry, outside any internal lock.
#[derive(Debug, Clone)]
pub struct EntryWritten {
    pub entry_count: u64,
    pub entry_url: String,
    pub current_page_ref: Option<String>,
}

pub trait EntryWrittenCallback: Send + Sync {
    fn on_entry_written(&self, event: EntryWritten);
}

impl<F: Fn(EntryWritten) + Send + Sync> EntryWrittenCallback for F {
    fn on_entry_written(&self, event: EntryWritten) {
        self(event)
    }
}

struct Mutable {
    state: State,
    entries: Vec<Entry>,
    pages: Vec<Page>,
    current_page_ref: Option<String>,
    entry_count: u64,
    first_request_wall_ms: Option<f64>,
    dom_content_loaded_ms: Option<f64>,
    load_ms: Option<f64>,
}

struct Inner {
    options: Options,
    logger: LoggerHandle,
    adapter: Arc<dyn Adapter>,
    correlator: Correlator,
    ws: crate::ws::WsAccumulator,
    redactor: Redactor,
    url_matcher: UrlMatcher,
    mime_matcher: MimeMatcher,
    paused: AtomicBool,
    body_pipeline: Mutex<Option<BodyPipeline>>,
    completion_drainer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    writer: Mutex<Option<StreamWriter>>,
    mutable: RwLock<Mutable>,
    entry_written_callback: Option<Arc<dyn EntryWrittenCallback>>,
}

/// A capture session. Cheaply cloned (internally `Arc`-backed) so the
/// completion-draining task can hold its own handle without a back-pointer
/// from the body pipeline.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        options: Options,
        adapter: Arc<dyn Adapter>,
        logger: LoggerHandle,
        entry_written_callback: Option<Arc<dyn EntryWrittenCallback>>,
    ) -> Result<Self, CaptureError> {
        validate(&options)?;

        let redactor = Redactor::new(
            &options.sensitive_headers,
            &options.sensitive_cookies,
            &options.sensitive_query_params,
            &options.sensitive_body_patterns,
        );
        let url_matcher = UrlMatcher::new(&options.url_include_patterns, &options.url_exclude_patterns);
        let mime_matcher = MimeMatcher::new(options.response_body_scope, &options.response_body_mime_filter);

        Ok(Session {
            inner: Arc::new(Inner {
                options,
                logger,
                adapter,
                correlator: Correlator::new(),
                ws: crate::ws::WsAccumulator::new(),
                redactor,
                url_matcher,
                mime_matcher,
                paused: AtomicBool::new(false),
                body_pipeline: Mutex::new(None),
                completion_drainer: Mutex::new(None),
                writer: Mutex::new(None),
                mutable: RwLock::new(Mutable {
                    state: State::Idle,
                    entries: Vec::new(),
                    pages: Vec::new(),
                    current_page_ref: None,
                    entry_count: 0,
                    first_request_wall_ms: None,
                    dom_content_loaded_ms: None,
                    load_ms: None,
                }),
                entry_written_callback,
            }),
        })
    }

    pub async fn start(
        &self,
        initial_page: Option<(String, String)>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), CaptureError> {
        {
            let mut mutable = self.inner.mutable.write().await;
            match mutable.state {
                State::Disposed => return Err(CaptureError::Disposed),
                State::Capturing => return Err(CaptureError::AlreadyStarted),
                State::Idle | State::Stopped => {}
            }
            mutable.state = State::Capturing;

            if let Some((page_ref, title)) = &initial_page {
                mutable.pages.push(Page {
                    id: page_ref.clone(),
                    title: title.clone(),
                    started_date_time: chrono::Utc::now().to_rfc3339(),
                    page_timings: PageTimings::default(),
                });
                mutable.current_page_ref = Some(page_ref.clone());
            }
        }

        let creator = Creator {
            name: self.inner.options.creator_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        };

        if let Some(path) = &self.inner.options.output_file_path {
            let browser = self.browser();
            let custom = if self.inner.options.custom_metadata.is_empty() {
                None
            } else {
                Some(self.inner.options.custom_metadata.clone())
            };
            let writer = StreamWriter::new(
                path,
                creator,
                browser,
                custom,
                self.inner.options.max_output_file_size,
                self.inner.options.enable_compression,
                self.inner.logger.clone(),
            )
            .map_err(|source| CaptureError::OutputFile {
                path: path.clone(),
                source,
            })?;
            if let Some((page_ref, title)) = &initial_page {
                writer.add_page(Page {
                    id: page_ref.clone(),
                    title: title.clone(),
                    started_date_time: chrono::Utc::now().to_rfc3339(),
                    page_timings: PageTimings::default(),
                });
            }
            *self.inner.writer.lock().await = Some(writer);
        }

        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<CompletedBody>();
        let pipeline = BodyPipeline::new(
            Arc::clone(&self.inner.adapter),
            self.inner.logger.clone(),
            self.inner.options.max_response_body_size,
            completion_tx,
            3,
        );
        *self.inner.body_pipeline.lock().await = Some(pipeline);

        let session_for_drain = self.clone();
        let drainer = tokio::spawn(async move {
            while let Some(completed) = completion_rx.recv().await {
                session_for_drain.accept_entry(completed.entry).await;
            }
        });
        *self.inner.completion_drainer.lock().await = Some(drainer);

        let enable = async {
            let _ = self.inner.adapter.enable_network().await;
            let _ = self.inner.adapter.enable_page().await;
        };
        match cancel {
            Some(token) => {
                tokio::select! {
                    () = enable => {}
                    () = token.cancelled() => return Err(CaptureError::Cancelled),
                }
            }
            None => enable.await,
        }

        logger::log(&self.inner.logger, Level::Info, "capture started", &[]);
        Ok(())
    }

    fn browser(&self) -> Option<Browser> {
        match (&self.inner.options.browser_name, &self.inner.options.browser_version) {
            (Some(name), Some(version)) => Some(Browser {
                name: name.clone(),
                version: version.clone(),
            }),
            _ => None,
        }
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub async fn new_page(&self, page_ref: String, title: String) {
        let page = Page {
            id: page_ref.clone(),
            title,
            started_date_time: chrono::Utc::now().to_rfc3339(),
            page_timings: PageTimings::default(),
        };

        let mut mutable = self.inner.mutable.write().await;
        mutable.pages.push(page.clone());
        mutable.current_page_ref = Some(page_ref);
        drop(mutable);

        if let Some(writer) = self.inner.writer.lock().await.as_ref() {
            writer.add_page(page);
        }
    }

    /// Feeds one transport event into the engine. Exception-safe: any
    /// internal failure is logged and swallowed, never propagated to the
    /// caller, matching the "a dropped event never aborts a session"
    /// guarantee.
    pub async fn handle_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::RequestWillBeSent {
                request_id,
                method,
                url,
                headers,
                cookies,
                query_string,
                post_data,
                started_date_time,
                initiator,
                resource_type,
                redirect_response,
            } => {
                if self.inner.ws.is_websocket(&request_id) {
                    return;
                }

                if let Some(redirect) = redirect_response {
                    self.emit_redirect_entry(&request_id, &redirect).await;
                }

                if let Some(ms) = iso_to_epoch_ms(&started_date_time) {
                    let mut mutable = self.inner.mutable.write().await;
                    if mutable.first_request_wall_ms.is_none() {
                        mutable.first_request_wall_ms = Some(ms);
                    }
                }

                let capture_types = self.inner.options.capture_types;
                let redacted_url = self.inner.redactor.redact_url(&url);
                let request = har_types::har::Request {
                    method,
                    url: redacted_url,
                    http_version: "HTTP/1.1".to_owned(),
                    cookies: if capture_types.contains(CaptureTypes::REQ_COOKIES) {
                        to_cookies(self.inner.redactor.redact_cookies(&pairs(&cookies)))
                    } else {
                        vec![]
                    },
                    headers: if capture_types.contains(CaptureTypes::REQUEST_HDRS) {
                        to_headers(self.inner.redactor.redact_headers(&pairs(&headers)))
                    } else {
                        vec![]
                    },
                    query_string: to_query(self.inner.redactor.redact_query(&pairs(&query_string))),
                    post_data: if capture_types.contains(CaptureTypes::REQ_CONTENT) {
                        post_data.map(|(mime_type, text)| har_types::har::PostData {
                            mime_type,
                            params: vec![],
                            text,
                        })
                    } else {
                        None
                    },
                    headers_size: -1,
                    body_size: 0,
                };

                self.inner.correlator.on_request_sent(
                    &request_id,
                    request,
                    started_date_time,
                    initiator,
                    resource_type,
                );
            }
            AdapterEvent::ResponseReceived {
                request_id,
                status,
                status_text,
                headers,
                cookies,
                mime_type,
                from_disk_cache,
                from_service_worker,
                timings,
                total_time_ms,
            } => {
                if self.inner.ws.is_websocket(&request_id) {
                    return;
                }

                let capture_types = self.inner.options.capture_types;
                let cache_signal = if from_disk_cache {
                    CacheSignal::FromDiskCache
                } else if from_service_worker {
                    CacheSignal::FromServiceWorker
                } else {
                    CacheSignal::None
                };
                let timings = if capture_types.contains(CaptureTypes::TIMINGS) {
                    to_har_timings(timings)
                } else {
                    har_types::har::Timings::empty()
                };

                let Some(completed) = self.inner.correlator.on_response_received(
                    &request_id,
                    timings,
                    total_time_ms,
                    status,
                    cache_signal,
                ) else {
                    logger::log(&self.inner.logger, Level::Warn, "stray response event", &[("request_id", &request_id)]);
                    return;
                };

                let resource_type = completed.resource_type.clone().unwrap_or_default();
                let entry = Entry {
                    started_date_time: completed.started_date_time,
                    time: completed.total_time,
                    request: completed.request.clone(),
                    response: har_types::har::Response {
                        status,
                        status_text,
                        http_version: "HTTP/1.1".to_owned(),
                        cookies: if capture_types.contains(CaptureTypes::RESP_COOKIES) {
                            to_cookies(self.inner.redactor.redact_cookies(&pairs(&cookies)))
                        } else {
                            vec![]
                        },
                        headers: if capture_types.contains(CaptureTypes::RESP_HDRS) {
                            to_headers(self.inner.redactor.redact_headers(&pairs(&headers)))
                        } else {
                            vec![]
                        },
                        content: har_types::har::Content {
                            size: 0,
                            mime_type: mime_type.clone(),
                            text: None,
                            encoding: None,
                        },
                        redirect_url: String::new(),
                        headers_size: -1,
                        body_size: 0,
                    },
                    cache: completed.cache,
                    timings: completed.timings,
                    pageref: None,
                    server_ip_address: None,
                    connection: None,
                    comment: None,
                    resource_type: completed.resource_type,
                    websocket_messages: None,
                    initiator: completed.initiator,
                    security_details: None,
                    request_body_size: Some(completed.request.body_size),
                    response_body_size: None,
                };

                let should_retrieve = !matches!(status, 204 | 304)
                    && self.inner.mime_matcher.should_retrieve_body(&mime_type, &resource_type)
                    && capture_types.contains(CaptureTypes::RESP_CONTENT);

                if should_retrieve {
                    if let Some(pipeline) = self.inner.body_pipeline.lock().await.as_ref() {
                        pipeline
                            .submit(BodyJob {
                                request_id,
                                entry,
                                mime_type,
                            })
                            .await;
                        return;
                    }
                }
                self.accept_entry(entry).await;
            }
            AdapterEvent::LoadingFinished { .. } | AdapterEvent::LoadingFailed { .. } => {
                // Bodies are retrieved on response-received, not here (see
                // the body pipeline's retrieval-timing decision); these
                // events carry no further action for the core.
            }
            AdapterEvent::WsCreated { request_id, url, timestamp, wall_time } => {
                self.inner.ws.on_created(&request_id, &url, timestamp, wall_time);
            }
            AdapterEvent::WsHandshakeRequest { request_id, headers } => {
                self.inner.ws.on_handshake_request(&request_id, headers);
            }
            AdapterEvent::WsHandshakeResponse { request_id, status, status_text, headers } => {
                self.inner
                    .ws
                    .on_handshake_response(&request_id, status, status_text, headers);
            }
            AdapterEvent::WsFrameSent { request_id, timestamp, opcode, data } => {
                self.record_ws_frame(&request_id, har_types::har::WsMessageDirection::Send, timestamp, opcode, data);
            }
            AdapterEvent::WsFrameReceived { request_id, timestamp, opcode, data } => {
                self.record_ws_frame(&request_id, har_types::har::WsMessageDirection::Receive, timestamp, opcode, data);
            }
            AdapterEvent::WsClosed { request_id } => {
                if let Some(entry) = self.inner.ws.flush(&request_id) {
                    self.accept_entry(entry).await;
                }
            }
            AdapterEvent::DomContentEventFired { timestamp_ms } => {
                self.inner.mutable.write().await.dom_content_loaded_ms = Some(timestamp_ms);
            }
            AdapterEvent::LoadEventFired { timestamp_ms } => {
                self.inner.mutable.write().await.load_ms = Some(timestamp_ms);
            }
        }
    }

    fn record_ws_frame(
        &self,
        request_id: &str,
        direction: har_types::har::WsMessageDirection,
        timestamp: f64,
        opcode: u8,
        data: String,
    ) {
        if !self.inner.options.capture_types.contains(CaptureTypes::WEBSOCKET) {
            return;
        }
        self.inner.ws.add_frame(
            request_id,
            direction,
            timestamp,
            opcode,
            data,
            self.inner.options.max_ws_frames_per_connection,
            Some(&self.inner.redactor),
        );
    }

    /// Synthesizes and emits a completed entry for the redirect hop itself
    /// (the request that never received its own `response-received`, because
    /// the transport folded it into the next request's `redirect_response`).
    /// Looks up the hop's pending entry via the correlator; a miss means the
    /// adapter reported a redirect for an id we never saw `RequestWillBeSent`
    /// for, which is logged and dropped like any other stray event.
    async fn emit_redirect_entry(&self, request_id: &str, redirect: &crate::adapter::RedirectResponse) {
        let Some(pending) = self.inner.correlator.take_pending(request_id) else {
            logger::log(&self.inner.logger, Level::Warn, "stray redirect hop", &[("request_id", request_id)]);
            return;
        };

        let headers = if self.inner.options.capture_types.contains(CaptureTypes::RESP_HDRS) {
            to_headers(self.inner.redactor.redact_headers(&pairs(&redirect.headers)))
        } else {
            vec![]
        };

        let entry = Entry {
            started_date_time: pending.started_date_time,
            time: 0.0,
            request: pending.request.clone(),
            response: har_types::har::Response {
                status: redirect.status,
                status_text: redirect.status_text.clone(),
                http_version: "HTTP/1.1".to_owned(),
                cookies: vec![],
                headers,
                content: har_types::har::Content {
                    size: 0,
                    mime_type: String::new(),
                    text: None,
                    encoding: None,
                },
                redirect_url: String::new(),
                headers_size: -1,
                body_size: 0,
            },
            cache: har_types::har::CacheState::default(),
            timings: har_types::har::Timings::empty(),
            pageref: None,
            server_ip_address: None,
            connection: None,
            comment: None,
            resource_type: pending.resource_type,
            websocket_messages: None,
            initiator: pending.initiator,
            security_details: None,
            request_body_size: Some(pending.request.body_size),
            response_body_size: None,
        };

        self.accept_entry(entry).await;
    }

    /// `EntryCompleted` handler: applies pause/filter/pageref, then either
    /// enqueues to the stream writer or appends in-memory, firing
    /// `EntryWritten` outside any lock.
    async fn accept_entry(&self, mut entry: Entry) {
        if self.inner.paused.load(Ordering::SeqCst) {
            return;
        }
        if !self.inner.url_matcher.should_capture(&entry.request.url) {
            return;
        }

        let (entry_count, current_page_ref, streaming) = {
            let mut mutable = self.inner.mutable.write().await;
            entry.pageref = mutable.current_page_ref.clone();

            if self.inner.options.output_file_path.is_some() {
                mutable.entry_count += 1;
            } else {
                mutable.entries.push(entry.clone());
                mutable.entry_count = mutable.entries.len() as u64;
            }
            (
                mutable.entry_count,
                mutable.current_page_ref.clone(),
                self.inner.options.output_file_path.is_some(),
            )
        };

        if streaming {
            if let Some(writer) = self.inner.writer.lock().await.as_ref() {
                writer.write_entry(entry.clone());
            }
        }

        if let Some(callback) = &self.inner.entry_written_callback {
            callback.on_entry_written(EntryWritten {
                entry_count,
                entry_url: entry.request.url,
                current_page_ref,
            });
        }
    }

    /// Disables transport domains, drains the body pipeline (bounded by a
    /// timeout, proceeding anyway on expiry), flushes unclosed WebSocket
    /// connections, and finalizes the stream writer. Idempotent.
    ///
    /// If `cancel` is given and fires before the drain completes, returns
    /// `CaptureError::Cancelled` immediately without finishing the stream
    /// writer -- the caller asked to abandon the capture, not just stop it
    /// cleanly.
    pub async fn stop(&self, cancel: Option<&CancellationToken>) -> Result<(), CaptureError> {
        {
            let mut mutable = self.inner.mutable.write().await;
            match mutable.state {
                State::Idle => return Err(CaptureError::NotStarted),
                State::Disposed => return Err(CaptureError::Disposed),
                State::Stopped => return Ok(()),
                State::Capturing => mutable.state = State::Stopped,
            }
        }

        let drain = async {
            let _ = tokio::time::timeout(DISABLE_NETWORK_TIMEOUT, self.inner.adapter.disable_network()).await;
            let _ = tokio::time::timeout(DISABLE_NETWORK_TIMEOUT, self.inner.adapter.disable_page()).await;

            if let Some(pipeline) = self.inner.body_pipeline.lock().await.take() {
                pipeline.shutdown(BODY_DRAIN_TIMEOUT).await;
            }
            if let Some(drainer) = self.inner.completion_drainer.lock().await.take() {
                let _ = tokio::time::timeout(BODY_DRAIN_TIMEOUT, drainer).await;
            }

            self.write_page_timings().await;

            if let Some(writer) = self.inner.writer.lock().await.take() {
                writer.finish().await;
            }
        };

        match cancel {
            Some(token) => {
                tokio::select! {
                    () = drain => {}
                    () = token.cancelled() => {
                        logger::log(&self.inner.logger, Level::Warn, "stop cancelled", &[]);
                        return Err(CaptureError::Cancelled);
                    }
                }
            }
            None => drain.await,
        }

        logger::log(&self.inner.logger, Level::Info, "capture stopped", &[]);
        Ok(())
    }

    async fn write_page_timings(&self) {
        let mut mutable = self.inner.mutable.write().await;
        let first = mutable.first_request_wall_ms;
        let dom = mutable.dom_content_loaded_ms;
        let load = mutable.load_ms;
        if let (Some(first), Some(page)) = (first, mutable.pages.last_mut()) {
            page.page_timings.on_content_load = dom.map(|d| d - first);
            page.page_timings.on_load = load.map(|l| l - first);
        }
    }

    /// Marks the session permanently unusable. Idempotent; a second call
    /// is a no-op.
    pub async fn dispose(&self) {
        let mut mutable = self.inner.mutable.write().await;
        mutable.state = State::Disposed;
    }

    /// Live snapshot. In streaming mode, returns metadata only: the
    /// authoritative store is the file on disk, not this in-memory copy.
    pub async fn get_har(&self) -> Log {
        let mutable = self.inner.mutable.read().await;
        let mut log = Log::new(Creator {
            name: self.inner.options.creator_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        });
        log.browser = self.browser();
        log.pages = mutable.pages.clone();
        if self.inner.options.output_file_path.is_none() {
            log.entries = mutable.entries.clone();
        }
        if !self.inner.options.custom_metadata.is_empty() {
            let mut map = serde_json::Map::new();
            for (k, v) in &self.inner.options.custom_metadata {
                map.insert(k.clone(), v.clone());
            }
            log.custom = Some(map);
        }
        log
    }

    /// Path of the streamed output file (or its `.gz` sibling once
    /// compression has been configured), if streaming mode is active.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.inner.options.output_file_path.as_ref().map(PathBuf::from)
    }
}

fn pairs(input: &[(String, String)]) -> Vec<(String, String)> {
    input.to_vec()
}

fn to_headers(pairs: Vec<(String, String)>) -> Vec<har_types::har::HeaderEntry> {
    pairs
        .into_iter()
        .map(|(name, value)| har_types::har::HeaderEntry { name, value })
        .collect()
}

fn to_cookies(pairs: Vec<(String, String)>) -> Vec<har_types::har::Cookie> {
    pairs
        .into_iter()
        .map(|(name, value)| har_types::har::Cookie { name, value })
        .collect()
}

fn to_query(pairs: Vec<(String, String)>) -> Vec<har_types::har::QueryParam> {
    pairs
        .into_iter()
        .map(|(name, value)| har_types::har::QueryParam { name, value })
        .collect()
}

/// Parses an RFC 3339 `startedDateTime` string into epoch milliseconds, on
/// the assumption that `DomContentEventFired`/`LoadEventFired` timestamps
/// share that same wall-clock basis.
fn iso_to_epoch_ms(iso: &str) -> Option<f64> {
    chrono::DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| dt.timestamp_millis() as f64)
}

fn to_har_timings(timings: Option<crate::adapter::TransportTimings>) -> har_types::har::Timings {
    match timings {
        Some(t) => har_types::har::Timings {
            blocked: t.blocked,
            dns: t.dns,
            connect: t.connect,
            send: t.send,
            wait: t.wait,
            receive: t.receive,
            ssl: t.ssl,
        },
        None => har_types::har::Timings::empty(),
    }
}
