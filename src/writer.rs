//! Seek-back incremental HAR stream writer (C8).
//!
//! Goal: the output file is always valid HAR JSON, after every entry write,
//! at minimal cost. Producers only enqueue; a single consumer owns the file
//! handle and needs no per-operation lock.

use crate::logger::{self, Level, LoggerHandle};
use har_types::har::{Browser, Creator, Page};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

enum Command {
    WriteEntry(har_types::har::Entry),
    AddPage(Page),
    Flush(oneshot::Sender<()>),
}

pub struct StreamWriter {
    tx: mpsc::UnboundedSender<Command>,
    consumer: Option<tokio::task::JoinHandle<PathBuf>>,
}

impl StreamWriter {
    /// Opens (creating parent directories best-effort) and initializes the
    /// output file, writing the `{"log":{...,"entries":[` header
    /// immediately so the file is valid JSON even with zero entries.
    pub fn new(
        path: &str,
        creator: Creator,
        browser: Option<Browser>,
        custom: Option<HashMap<String, serde_json::Value>>,
        max_output_file_size: u64,
        enable_compression: bool,
        logger: LoggerHandle,
    ) -> Result<Self, std::io::Error> {
        let path_buf = PathBuf::from(path);
        if let Some(parent) = path_buf.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        let mut file = File::create(&path_buf)?;
        let header = format!(
            "{{\"log\":{{\"version\":\"1.2\",\"creator\":{},\"entries\":[",
            serde_json::to_string(&creator).expect("Creator always serializes")
        );
        file.write_all(header.as_bytes())?;
        let footer_start = header.len() as u64;
        file.flush()?;

        let mut state = ConsumerState {
            file,
            footer_start,
            entries_count: 0,
            pages: Vec::new(),
            browser,
            custom,
            max_output_file_size,
            cap_exceeded: false,
            enable_compression,
            path: path_buf.clone(),
            logger,
        };
        state.rewrite_footer()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::task::spawn_blocking(move || consumer_loop(state, rx));

        Ok(StreamWriter {
            tx,
            consumer: Some(consumer),
        })
    }

    pub fn write_entry(&self, entry: har_types::har::Entry) {
        let _ = self.tx.send(Command::WriteEntry(entry));
    }

    pub fn add_page(&self, page: Page) {
        let _ = self.tx.send(Command::AddPage(page));
    }

    /// Waits until every command enqueued before this call has been
    /// processed by the consumer.
    pub async fn flush_barrier(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Closes the producer side, waits for the consumer to drain, and
    /// returns the effective output path (the `.gz` path if compression was
    /// enabled).
    pub async fn finish(self) -> PathBuf {
        let StreamWriter { tx, consumer } = self;
        drop(tx);
        if let Some(consumer) = consumer {
            consumer.await.unwrap_or_else(|_| PathBuf::new())
        } else {
            PathBuf::new()
        }
    }
}

struct ConsumerState {
    file: File,
    footer_start: u64,
    entries_count: u64,
    pages: Vec<Page>,
    browser: Option<Browser>,
    custom: Option<HashMap<String, serde_json::Value>>,
    max_output_file_size: u64,
    cap_exceeded: bool,
    enable_compression: bool,
    path: PathBuf,
    logger: LoggerHandle,
}

impl ConsumerState {
    fn footer(&self) -> String {
        let mut footer = String::from("]");
        if !self.pages.is_empty() {
            footer.push_str(",\"pages\":");
            footer.push_str(&serde_json::to_string(&self.pages).expect("pages always serialize"));
        }
        if let Some(browser) = &self.browser {
            footer.push_str(",\"browser\":");
            footer.push_str(&serde_json::to_string(browser).expect("browser always serializes"));
        }
        if let Some(custom) = &self.custom {
            footer.push_str(",\"_custom\":");
            footer.push_str(&serde_json::to_string(custom).expect("custom map always serializes"));
        }
        footer.push_str("}}");
        footer
    }

    fn rewrite_footer(&mut self) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(self.footer_start))?;
        let footer = self.footer();
        self.file.write_all(footer.as_bytes())?;
        let end = self.footer_start + footer.len() as u64;
        self.file.set_len(end)?;
        self.file.flush()
    }

    fn write_entry(&mut self, entry: &har_types::har::Entry) -> std::io::Result<()> {
        if self.cap_exceeded {
            return Ok(());
        }

        let entry_json = serde_json::to_string(entry).expect("Entry always serializes");
        let prefix = if self.entries_count > 0 { "," } else { "" };
        let footer = self.footer();
        let projected_len =
            self.footer_start + prefix.len() as u64 + entry_json.len() as u64 + footer.len() as u64;

        if self.max_output_file_size > 0 && projected_len > self.max_output_file_size {
            self.cap_exceeded = true;
            logger::log(
                &self.logger,
                Level::Warn,
                "output file size cap reached, dropping entry",
                &[("path", &self.path.display().to_string())],
            );
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.footer_start))?;
        if !prefix.is_empty() {
            self.file.write_all(prefix.as_bytes())?;
        }
        self.file.write_all(entry_json.as_bytes())?;
        self.footer_start += prefix.len() as u64 + entry_json.len() as u64;
        self.entries_count += 1;
        self.rewrite_footer()
    }

    fn add_page(&mut self, page: Page) -> std::io::Result<()> {
        self.pages.push(page);
        self.rewrite_footer()
    }

    fn finalize(mut self) -> PathBuf {
        if !self.enable_compression {
            return self.path;
        }
        let gz_path = {
            let mut p = self.path.clone().into_os_string();
            p.push(".gz");
            PathBuf::from(p)
        };
        let result = (|| -> std::io::Result<()> {
            self.file.seek(SeekFrom::Start(0))?;
            let raw = File::open(&self.path)?;
            let gz_file = File::create(&gz_path)?;
            let mut encoder = flate2::write::GzEncoder::new(gz_file, flate2::Compression::default());
            std::io::copy(&mut std::io::BufReader::new(raw), &mut encoder)?;
            encoder.finish()?;
            std::fs::remove_file(&self.path)?;
            Ok(())
        })();
        match result {
            Ok(()) => gz_path,
            Err(err) => {
                logger::log(
                    &self.logger,
                    Level::Warn,
                    "gzip finalization failed, leaving raw file in place",
                    &[("error", &err.to_string())],
                );
                self.path
            }
        }
    }
}

fn consumer_loop(mut state: ConsumerState, mut rx: mpsc::UnboundedReceiver<Command>) -> PathBuf {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::WriteEntry(entry) => {
                if let Err(err) = state.write_entry(&entry) {
                    logger::log(
                        &state.logger,
                        Level::Error,
                        "stream writer I/O failure",
                        &[("error", &err.to_string())],
                    );
                }
            }
            Command::AddPage(page) => {
                if let Err(err) = state.add_page(page) {
                    logger::log(
                        &state.logger,
                        Level::Error,
                        "stream writer I/O failure",
                        &[("error", &err.to_string())],
                    );
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    state.finalize()
}

/// Reads back a streamed HAR file for tests and diagnostics.
pub fn read_har_file(path: &Path) -> Result<har_types::har::Log, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    #[derive(serde::Deserialize)]
    struct Wrapper {
        log: har_types::har::Log,
    }
    let wrapper: Wrapper = serde_json::from_str(&text)?;
    Ok(wrapper.log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use har_types::har::{
        CacheState, Content, Entry, Request, Response, Timings,
    };

    fn sample_entry(n: u32) -> Entry {
        Entry {
            started_date_time: format!("t{n}"),
            time: 1.0,
            request: Request {
                method: "GET".to_owned(),
                url: format!("https://example.com/{n}"),
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
    async fn file_is_valid_json_after_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.har");
        let writer = StreamWriter::new(
            path.to_str().unwrap(),
            Creator { name: "har-capture".to_owned(), version: "0.1.0".to_owned() },
            None,
            None,
            0,
            false,
            None,
        )
        .unwrap();

        for n in 0..5 {
            writer.write_entry(sample_entry(n));
        }
        writer.flush_barrier().await;
        let log = read_har_file(&path).unwrap();
        assert_eq!(log.entries.len(), 5);
        writer.finish().await;
    }

    #[tokio::test]
    async fn size_cap_drops_entries_but_keeps_file_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.har");
        let writer = StreamWriter::new(
            path.to_str().unwrap(),
            Creator { name: "har-capture".to_owned(), version: "0.1.0".to_owned() },
            None,
            None,
            500,
            false,
            None,
        )
        .unwrap();

        for n in 0..30 {
            writer.write_entry(sample_entry(n));
        }
        writer.flush_barrier().await;
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() <= 500 + 256);
        let log = read_har_file(&path).unwrap();
        assert!(!log.entries.is_empty());
        writer.finish().await;
    }

    #[tokio::test]
    async fn add_page_rewrites_footer_without_corrupting_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.har");
        let writer = StreamWriter::new(
            path.to_str().unwrap(),
            Creator { name: "har-capture".to_owned(), version: "0.1.0".to_owned() },
            None,
            None,
            0,
            false,
            None,
        )
        .unwrap();

        writer.write_entry(sample_entry(0));
        writer.add_page(Page {
            id: "page_1".to_owned(),
            title: "Example".to_owned(),
            started_date_time: "t0".to_owned(),
            page_timings: har_types::har::PageTimings::default(),
        });
        writer.write_entry(sample_entry(1));
        writer.flush_barrier().await;

        let log = read_har_file(&path).unwrap();
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.pages.len(), 1);
        writer.finish().await;
    }
}
