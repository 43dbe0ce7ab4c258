//! Pairing of accept-side streams with their connect-side replies

use crate::proxy::frames::{CorrelationId, StreamId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Joins a connect-side reply back to the accept stream that caused it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Peer that opened the accept stream
    pub accept_name: String,
    /// Correlation id the accept stream arrived with
    pub accept_correlation_id: CorrelationId,
    pub accept_stream_id: StreamId,
    /// Outbound stream opened toward the routed target
    pub connect_stream_id: StreamId,
}

/// Correlations awaiting their reply, keyed by the id sent to the target
#[derive(Debug)]
pub struct CorrelationTable {
    pending: DashMap<CorrelationId, Correlation>,
    next_id: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(rand::random::<u32>() as u64 + 1),
        }
    }

    /// Mint a fresh, non-zero correlation id
    pub fn next_id(&self) -> CorrelationId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn insert(&self, id: CorrelationId, correlation: Correlation) {
        debug!(correlation_id = id, accept = %correlation.accept_name, "Recorded correlation");
        self.pending.insert(id, correlation);
    }

    /// Remove and return the correlation, if still pending.
    ///
    /// At most one caller ever receives a given entry.
    pub fn claim(&self, id: CorrelationId) -> Option<Correlation> {
        self.pending.remove(&id).map(|(_, correlation)| correlation)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
