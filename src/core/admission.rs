//! Per-source connection admission control
//!
//! Caps concurrent connections per source address and keeps a short
//! grace record for sources that disconnect, so a reconnect within the
//! grace window does not re-allocate tracking state.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::constants::{ADMISSION_GRACE_SECS, ADMISSION_SWEEP_INTERVAL_SECS};

/// Tracking state for one source address
struct SourceRecord {
    connections: HashSet<String>,
    /// Set when the last connection releases; cleared on re-admit
    empty_since: Option<Instant>,
}

impl SourceRecord {
    fn new() -> Self {
        Self {
            connections: HashSet::new(),
            empty_since: None,
        }
    }
}

/// Admission gate for new connections, keyed by source IP
pub struct ConnectionAdmission {
    sources: RwLock<HashMap<IpAddr, SourceRecord>>,
    max_per_source: usize,
    grace: Duration,
}

impl ConnectionAdmission {
    pub fn new(max_per_source: usize) -> Self {
        Self::with_grace(max_per_source, Duration::from_secs(ADMISSION_GRACE_SECS))
    }

    /// Admission gate with a custom grace period for released sources
    pub fn with_grace(max_per_source: usize, grace: Duration) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            max_per_source,
            grace,
        }
    }

    /// Admit a connection if the source is under its ceiling.
    ///
    /// Rejection mutates nothing: a refused connection leaves no trace.
    pub async fn try_admit(&self, source: IpAddr, connection_id: &str) -> bool {
        let mut sources = self.sources.write().await;
        let record = sources.entry(source).or_insert_with(SourceRecord::new);

        if record.connections.contains(connection_id) {
            return true;
        }
        if record.connections.len() >= self.max_per_source {
            // Drop the record again if this reject created it
            if record.connections.is_empty() && record.empty_since.is_none() {
                sources.remove(&source);
            }
            return false;
        }

        record.connections.insert(connection_id.to_string());
        record.empty_since = None;
        true
    }

    /// Release a connection. The source record survives for the grace
    /// period so an immediate reconnect reuses it.
    pub async fn release(&self, source: IpAddr, connection_id: &str) {
        let mut sources = self.sources.write().await;
        if let Some(record) = sources.get_mut(&source) {
            record.connections.remove(connection_id);
            if record.connections.is_empty() && record.empty_since.is_none() {
                record.empty_since = Some(Instant::now());
            }
        }
    }

    /// Current connection count for a source
    pub async fn count(&self, source: IpAddr) -> usize {
        let sources = self.sources.read().await;
        sources
            .get(&source)
            .map(|r| r.connections.len())
            .unwrap_or(0)
    }

    /// Number of tracked sources, including empty ones still in grace
    pub async fn total_tracked(&self) -> usize {
        let sources = self.sources.read().await;
        sources.len()
    }

    /// Total connections across all sources
    pub async fn total_connections(&self) -> usize {
        let sources = self.sources.read().await;
        sources.values().map(|r| r.connections.len()).sum()
    }

    /// Drop records that have been empty for longer than the grace period
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let grace = self.grace;
        let mut sources = self.sources.write().await;
        let before = sources.len();
        sources.retain(|_, record| match record.empty_since {
            Some(emptied) if record.connections.is_empty() => {
                now.duration_since(emptied) < grace
            }
            _ => true,
        });
        let purged = before - sources.len();
        if purged > 0 {
            log::debug!("Admission sweep purged {} idle source record(s)", purged);
        }
    }

    /// Start the periodic purge task. The caller owns the handle and
    /// aborts it on shutdown.
    pub fn start_sweep_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(ADMISSION_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.purge_expired().await;
            }
        })
    }
}
