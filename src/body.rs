//! Response body retrieval pipeline (C5).
//!
//! A bounded queue with wait-mode back-pressure, drained by a small pool of
//! worker tasks that call the adapter and apply the URL-keyed LRU cache and
//! size cap before completing each entry.

use crate::adapter::Adapter;
use crate::logger::{self, Level, LoggerHandle};
use har_types::har::Entry;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const QUEUE_CAPACITY: usize = 2000;
const DEFAULT_WORKERS: usize = 3;
const CACHE_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
struct CachedBody {
    text: Option<String>,
    base64: bool,
}

pub struct BodyJob {
    pub request_id: String,
    pub entry: Entry,
    pub mime_type: String,
}

/// An entry, reshaped with its retrieved (or absent) body content, ready to
/// be handed to the session's `EntryCompleted` handler.
pub struct CompletedBody {
    pub entry: Entry,
}

pub struct BodyPipeline {
    tx: mpsc::Sender<BodyJob>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl BodyPipeline {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        logger: LoggerHandle,
        max_response_body_size: u64,
        completion_tx: mpsc::UnboundedSender<CompletedBody>,
        worker_count: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let cache: Arc<Mutex<LruCache<String, CachedBody>>> = Arc::new(Mutex::new(
            LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero")),
        ));

        let worker_count = if worker_count == 0 { DEFAULT_WORKERS } else { worker_count };
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = Arc::clone(&rx);
            let cache = Arc::clone(&cache);
            let adapter = Arc::clone(&adapter);
            let logger = logger.clone();
            let completion_tx = completion_tx.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(rx, cache, adapter, logger, max_response_body_size, completion_tx).await;
            }));
        }

        BodyPipeline { tx, workers }
    }

    /// Enqueues a job, blocking the caller (wait-mode back-pressure) if the
    /// queue is full.
    pub async fn submit(&self, job: BodyJob) {
        // Send errors mean every worker has already exited; there is
        // nothing useful left to do with the job.
        let _ = self.tx.send(job).await;
    }

    /// Drops the sending half so workers drain and exit, then awaits them
    /// with the given timeout. Proceeds regardless of whether the timeout
    /// elapses.
    pub async fn shutdown(self, timeout: std::time::Duration) {
        drop(self.tx);
        let joined = tokio::time::timeout(timeout, futures_join_all(self.workers)).await;
        if joined.is_err() {
            // Workers are still draining; `stop` proceeds anyway per the
            // "proceed anyway on expiry" policy.
        }
    }
}

async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<BodyJob>>>,
    cache: Arc<Mutex<LruCache<String, CachedBody>>>,
    adapter: Arc<dyn Adapter>,
    logger: LoggerHandle,
    max_response_body_size: u64,
    completion_tx: mpsc::UnboundedSender<CompletedBody>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };
        let entry = process_job(job, &cache, adapter.as_ref(), &logger, max_response_body_size).await;
        if completion_tx.send(CompletedBody { entry }).is_err() {
            break;
        }
    }
}

async fn process_job(
    job: BodyJob,
    cache: &Arc<Mutex<LruCache<String, CachedBody>>>,
    adapter: &dyn Adapter,
    logger: &LoggerHandle,
    max_response_body_size: u64,
) -> Entry {
    let BodyJob { request_id, mut entry, .. } = job;
    let url = entry.request.url.clone();

    let cached = {
        let mut cache = cache.lock().await;
        cache.get(&url).cloned()
    };

    let body = match cached {
        Some(cached) => {
            logger::log(logger, Level::Debug, "body cache hit", &[("url", &url)]);
            Some(cached)
        }
        None => match adapter.get_response_body(&request_id).await {
            Ok(body) => {
                let cached = CachedBody {
                    text: Some(body.text.clone()),
                    base64: body.base64_encoded,
                };
                cache.lock().await.put(url.clone(), cached.clone());
                Some(cached)
            }
            Err(err) => {
                logger::log(
                    logger,
                    Level::Warn,
                    "body retrieval failed",
                    &[("request_id", &request_id), ("error", &err.0)],
                );
                None
            }
        },
    };

    if let Some(mut body) = body.and_then(|b| b.text.map(|t| (t, b.base64))) {
        let (mut text, base64) = (body.0.clone(), body.1);
        let mut truncated = false;
        if max_response_body_size > 0 && text.len() as u64 > max_response_body_size {
            // Truncate the base64-encoded string itself, pre-decode.
            text.truncate(max_response_body_size as usize);
            truncated = true;
        }
        body.0 = text;
        entry.response.content.size = if truncated {
            max_response_body_size as i64
        } else if base64 {
            base64_decoded_len(&body.0) as i64
        } else {
            body.0.len() as i64
        };
        entry.response.body_size = entry.response.content.size;
        entry.response.content.text = Some(body.0);
        entry.response.content.encoding = if base64 { Some("base64".to_owned()) } else { None };
    }

    entry
}

fn base64_decoded_len(encoded: &str) -> usize {
    let len = encoded.trim_end_matches('=').len();
    (len * 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, ResponseBody};
    use async_trait::async_trait;
    use har_types::har::{CacheState, Content, Request, Response, Timings};

    struct FakeAdapter {
        body: String,
        base64: bool,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        async fn enable_network(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn disable_network(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn enable_page(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn disable_page(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn get_response_body(&self, _request_id: &str) -> Result<ResponseBody, AdapterError> {
            Ok(ResponseBody {
                text: self.body.clone(),
                base64_encoded: self.base64,
            })
        }
    }

    fn blank_entry(url: &str) -> Entry {
        Entry {
            started_date_time: "t0".to_owned(),
            time: 0.0,
            request: Request {
                method: "GET".to_owned(),
                url: url.to_owned(),
                http_version: "HTTP/1.1".to_owned(),
                cookies: vec![],
                headers: vec![],
                query_string: vec![],
                post_data: None,
                headers_size: -1,
                body_size: 0,
            },
            response: Response {
                status: 200,
                status_text: "OK".to_owned(),
                http_version: "HTTP/1.1".to_owned(),
                cookies: vec![],
                headers: vec![],
                content: Content {
                    size: 0,
                    mime_type: "text/plain".to_owned(),
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
            resource_type: None,
            websocket_messages: None,
            initiator: None,
            security_details: None,
            request_body_size: None,
            response_body_size: None,
        }
    }

    #[tokio::test]
    async fn pipeline_completes_entry_with_body() {
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
        let adapter: Arc<dyn Adapter> = Arc::new(FakeAdapter {
            body: "<html/>".to_owned(),
            base64: false,
        });
        let pipeline = BodyPipeline::new(adapter, None, 0, completion_tx, 1);

        pipeline
            .submit(BodyJob {
                request_id: "1".to_owned(),
                entry: blank_entry("https://example.com/a"),
                mime_type: "text/html".to_owned(),
            })
            .await;

        let completed = completion_rx.recv().await.unwrap();
        assert_eq!(completed.entry.response.content.text.as_deref(), Some("<html/>"));
        pipeline.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn size_cap_truncates_body() {
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
        let adapter: Arc<dyn Adapter> = Arc::new(FakeAdapter {
            body: "0123456789".to_owned(),
            base64: false,
        });
        let pipeline = BodyPipeline::new(adapter, None, 4, completion_tx, 1);

        pipeline
            .submit(BodyJob {
                request_id: "1".to_owned(),
                entry: blank_entry("https://example.com/a"),
                mime_type: "text/plain".to_owned(),
            })
            .await;

        let completed = completion_rx.recv().await.unwrap();
        assert_eq!(completed.entry.response.content.text.as_deref(), Some("0123"));
        assert_eq!(completed.entry.response.content.size, 4);
        pipeline.shutdown(std::time::Duration::from_secs(1)).await;
    }

    struct FailingAdapter;

    #[async_trait]
    impl Adapter for FailingAdapter {
        async fn enable_network(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn disable_network(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn enable_page(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn disable_page(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn get_response_body(&self, _request_id: &str) -> Result<ResponseBody, AdapterError> {
            Err(AdapterError("no resource with given identifier".to_owned()))
        }
    }

    #[tokio::test]
    async fn adapter_failure_still_completes_the_entry_without_a_body() {
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
        let adapter: Arc<dyn Adapter> = Arc::new(FailingAdapter);
        let pipeline = BodyPipeline::new(adapter, None, 0, completion_tx, 1);

        pipeline
            .submit(BodyJob {
                request_id: "1".to_owned(),
                entry: blank_entry("https://example.com/a"),
                mime_type: "text/plain".to_owned(),
            })
            .await;

        let completed = completion_rx.recv().await.unwrap();
        assert!(completed.entry.response.content.text.is_none());
        pipeline.shutdown(std::time::Duration::from_secs(1)).await;
    }
}
