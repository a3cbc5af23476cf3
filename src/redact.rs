//! Redaction of sensitive header/cookie/query/body content (C2).
//!
//! All operations produce new collections; nothing is mutated in place.

use har_types::REDACTED;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Regex bodies are never matched against input larger than this.
const BODY_SIZE_GATE: usize = 512 * 1024;
/// Per-match timeout for body/frame redaction regexes.
const MATCH_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct RedactionCounters {
    pub body_redactions: AtomicU64,
    pub ws_redactions: AtomicU64,
    pub bodies_skipped: AtomicU64,
}

impl RedactionCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.body_redactions.load(Ordering::Relaxed),
            self.ws_redactions.load(Ordering::Relaxed),
            self.bodies_skipped.load(Ordering::Relaxed),
        )
    }
}

pub struct Redactor {
    headers_set: HashSet<String>,
    cookies_set: HashSet<String>,
    query_regex: Option<Regex>,
    body_regexes: Vec<Regex>,
    counters: RedactionCounters,
}

impl Redactor {
    pub fn new(
        sensitive_headers: &[String],
        sensitive_cookies: &[String],
        sensitive_query_params: &[String],
        sensitive_body_patterns: &[String],
    ) -> Self {
        let query_regex = if sensitive_query_params.is_empty() {
            None
        } else {
            let alternation = sensitive_query_params
                .iter()
                .map(|term| format!("^(?:{})$", glob_term_to_regex(term)))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!("(?i){alternation}")).ok()
        };

        let body_regexes = sensitive_body_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Redactor {
            headers_set: sensitive_headers.iter().map(|h| h.to_ascii_lowercase()).collect(),
            cookies_set: sensitive_cookies.iter().map(|c| c.to_ascii_lowercase()).collect(),
            query_regex,
            body_regexes,
            counters: RedactionCounters::default(),
        }
    }

    pub fn has_redactions(&self) -> bool {
        !self.headers_set.is_empty()
            || !self.cookies_set.is_empty()
            || self.query_regex.is_some()
            || !self.body_regexes.is_empty()
    }

    pub fn has_body_patterns(&self) -> bool {
        !self.body_regexes.is_empty()
    }

    pub fn counters(&self) -> &RedactionCounters {
        &self.counters
    }

    pub fn redact_headers(&self, headers: &[(String, String)]) -> Vec<(String, String)> {
        if self.headers_set.is_empty() {
            return headers.to_vec();
        }
        headers
            .iter()
            .map(|(name, value)| {
                if self.headers_set.contains(&name.to_ascii_lowercase()) {
                    (name.clone(), REDACTED.to_owned())
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect()
    }

    pub fn redact_cookies(&self, cookies: &[(String, String)]) -> Vec<(String, String)> {
        if self.cookies_set.is_empty() {
            return cookies.to_vec();
        }
        cookies
            .iter()
            .map(|(name, value)| {
                if self.cookies_set.contains(&name.to_ascii_lowercase()) {
                    (name.clone(), REDACTED.to_owned())
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect()
    }

    pub fn redact_query(&self, params: &[(String, String)]) -> Vec<(String, String)> {
        let Some(re) = &self.query_regex else {
            return params.to_vec();
        };
        params
            .iter()
            .map(|(name, value)| {
                if re.is_match(name) {
                    (name.clone(), REDACTED.to_owned())
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect()
    }

    /// Redacts query parameter values embedded in a URL, leaving the path
    /// and fragment-free tail intact.
    pub fn redact_url(&self, url: &str) -> String {
        if self.query_regex.is_none() {
            return url.to_owned();
        }
        let Some((head, tail)) = url.split_once('?') else {
            return url.to_owned();
        };
        let tail = tail.split('#').next().unwrap_or("");
        let params: Vec<(String, String)> = tail
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_owned(), v.to_owned()),
                None => (pair.to_owned(), String::new()),
            })
            .collect();
        let redacted = self.redact_query(&params);
        let rejoined = redacted
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{head}?{rejoined}")
    }

    /// Applies every configured body regex, replacing matches with
    /// `"[REDACTED]"`. Bodies over 512 KiB are left untouched. Each match
    /// is bounded by a 100 ms wall-clock budget; patterns that exceed it
    /// are skipped for that body.
    pub fn redact_body(&self, text: &str) -> (String, u64) {
        if text.len() > BODY_SIZE_GATE {
            self.counters.bodies_skipped.fetch_add(1, Ordering::Relaxed);
            return (text.to_owned(), 0);
        }

        let mut out = text.to_owned();
        let mut count = 0u64;
        for re in &self.body_regexes {
            match replace_with_timeout(re, &out) {
                Some((replaced, n)) => {
                    out = replaced;
                    count += n;
                }
                None => {
                    self.counters.bodies_skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if count > 0 {
            self.counters.body_redactions.fetch_add(count, Ordering::Relaxed);
        }
        (out, count)
    }

    /// Same as [`Redactor::redact_body`] but tallies into the WebSocket
    /// redaction counter instead of the body counter.
    pub fn redact_frame(&self, text: &str) -> String {
        if text.len() > BODY_SIZE_GATE || self.body_regexes.is_empty() {
            return text.to_owned();
        }
        let mut out = text.to_owned();
        let mut count = 0u64;
        for re in &self.body_regexes {
            match replace_with_timeout(re, &out) {
                Some((replaced, n)) => {
                    out = replaced;
                    count += n;
                }
                None => {
                    self.counters.bodies_skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if count > 0 {
            self.counters.ws_redactions.fetch_add(count, Ordering::Relaxed);
        }
        out
    }
}

/// Replaces every match of `re` in `text`, bailing out (returning `None`)
/// if a single match's processing exceeds [`MATCH_TIMEOUT`]. This guards
/// against catastrophic-backtracking patterns without vendoring a
/// timeout-aware regex engine: we check wall-clock elapsed between matches
/// rather than inside the engine itself.
fn replace_with_timeout(re: &Regex, text: &str) -> Option<(String, u64)> {
    let start = Instant::now();
    let mut count = 0u64;
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for m in re.find_iter(text) {
        if start.elapsed() > MATCH_TIMEOUT {
            return None;
        }
        out.push_str(&text[last_end..m.start()]);
        out.push_str(REDACTED);
        last_end = m.end();
        count += 1;
    }
    out.push_str(&text[last_end..]);
    if start.elapsed() > MATCH_TIMEOUT {
        return None;
    }
    Some((out, count))
}

fn glob_term_to_regex(term: &str) -> String {
    let mut out = String::with_capacity(term.len() * 2);
    for c in term.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}
