//! Request/response correlation (C3).
//!
//! A concurrent map from transport request-id to [`PendingEntry`], safe for
//! writers on the transport's own thread(s).

use har_types::har::{CacheState, Request, Timings};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub request: Request,
    pub started_date_time: String,
    pub initiator: Option<serde_json::Value>,
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletedEntry {
    pub request: Request,
    pub started_date_time: String,
    pub initiator: Option<serde_json::Value>,
    pub resource_type: Option<String>,
    pub timings: Timings,
    pub total_time: f64,
    pub cache: CacheState,
}

/// Transport-reported cache signal for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSignal {
    None,
    FromDiskCache,
    FromServiceWorker,
}

pub struct Correlator {
    pending: RwLock<HashMap<String, PendingEntry>>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotently inserts or updates a pending entry. Safe even if a
    /// response for the same id has already raced ahead and is already
    /// recorded as pending under a placeholder -- the latest
    /// `request-will-be-sent` always wins since it is the authoritative
    /// source for request fields.
    pub fn on_request_sent(
        &self,
        id: &str,
        request: Request,
        started_date_time: String,
        initiator: Option<serde_json::Value>,
        resource_type: Option<String>,
    ) {
        let mut pending = self.pending.write().expect("correlator lock poisoned");
        pending.insert(
            id.to_owned(),
            PendingEntry {
                request,
                started_date_time,
                initiator,
                resource_type,
            },
        );
    }

    /// Removes and returns the completed entry for `id`. Returns `None` if
    /// no pending entry exists, which the caller treats as a stray event.
    pub fn on_response_received(
        &self,
        id: &str,
        timings: Timings,
        total_time: f64,
        status: u16,
        cache_signal: CacheSignal,
    ) -> Option<CompletedEntry> {
        let pending = {
            let mut pending = self.pending.write().expect("correlator lock poisoned");
            pending.remove(id)
        }?;

        let cache = if cache_signal != CacheSignal::None || status == 304 {
            CacheState::from_disk_cache()
        } else {
            CacheState::default()
        };

        Some(CompletedEntry {
            request: pending.request,
            started_date_time: pending.started_date_time,
            initiator: pending.initiator,
            resource_type: pending.resource_type,
            timings,
            total_time,
            cache,
        })
    }

    /// Removes and returns the raw pending entry for `id`, without requiring
    /// response-shaped inputs. Used for redirect hops, which never receive a
    /// `response-received` event of their own.
    pub fn take_pending(&self, id: &str) -> Option<PendingEntry> {
        self.pending.write().expect("correlator lock poisoned").remove(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().expect("correlator lock poisoned").len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
