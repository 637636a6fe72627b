//! Audit event storage
//!
//! [`AuditStore`] is the seam for durable backends. [`InMemoryAuditStore`]
//! keeps a bounded window of the most recent events. Each stored record is
//! hash-linked to its predecessor, so editing or dropping a retained record
//! is detectable with [`InMemoryAuditStore::verify_chain`].

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::models::{AuditEvent, AuditQueryFilters};
use crate::error::AuditError;

type HmacSha256 = Hmac<Sha256>;

/// `prev_hash` of the very first record
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Default ring buffer size
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Append-only audit log with a query interface
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn save(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Matching events, newest first, paginated after sorting
    async fn query(&self, filters: &AuditQueryFilters) -> Result<Vec<AuditEvent>, AuditError>;

    /// Integrity check; backends without one report `None`
    async fn verify_integrity(&self) -> Result<Option<IntegrityReport>, AuditError> {
        Ok(None)
    }
}

/// Result of re-walking the hash chain
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub checked: usize,
    /// Events whose link or hash does not verify
    pub broken_links: Vec<Uuid>,
    pub checked_at: String,
}

/// Stored event plus its chain link
#[derive(Debug, Clone)]
pub struct ChainedRecord {
    pub event: AuditEvent,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug)]
struct Ring {
    records: VecDeque<ChainedRecord>,
    last_hash: String,
}

/// Bounded in-memory audit store
pub struct InMemoryAuditStore {
    ring: RwLock<Ring>,
    max_events: usize,
    chain_key: Option<Secret<String>>,
}

impl InMemoryAuditStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            ring: RwLock::new(Ring {
                records: VecDeque::new(),
                last_hash: GENESIS_HASH.to_string(),
            }),
            max_events: max_events.max(1),
            chain_key: None,
        }
    }

    /// Key the chain with HMAC-SHA256 instead of plain SHA-256
    pub fn with_chain_key(mut self, key: Secret<String>) -> Self {
        self.chain_key = Some(key);
        self
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub async fn len(&self) -> usize {
        self.ring.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ring.read().await.records.is_empty()
    }

    /// Snapshot of the retained records in insertion order
    pub async fn records(&self) -> Vec<ChainedRecord> {
        self.ring.read().await.records.iter().cloned().collect()
    }

    /// Recompute every link over the retained window
    ///
    /// The oldest retained record's `prev_hash` anchors the walk, so a
    /// window that has evicted older events still verifies.
    pub async fn verify_chain(&self) -> Result<IntegrityReport, AuditError> {
        let ring = self.ring.read().await;
        let mut broken_links = Vec::new();
        let mut expected_prev = ring
            .records
            .front()
            .map(|r| r.prev_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        for record in &ring.records {
            let recomputed = self.link_hash(&record.prev_hash, &record.event)?;
            if record.prev_hash != expected_prev || record.hash != recomputed {
                broken_links.push(record.event.id);
            }
            expected_prev = record.hash.clone();
        }

        Ok(IntegrityReport {
            is_valid: broken_links.is_empty(),
            checked: ring.records.len(),
            broken_links,
            checked_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn link_hash(&self, prev_hash: &str, event: &AuditEvent) -> Result<String, AuditError> {
        let canonical = serde_json::to_vec(event)?;
        match &self.chain_key {
            Some(key) => {
                let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
                    .map_err(|e| AuditError::InvalidKey(e.to_string()))?;
                mac.update(prev_hash.as_bytes());
                mac.update(&canonical);
                Ok(hex::encode(mac.finalize().into_bytes()))
            }
            None => {
                let mut hasher = Sha256::new();
                hasher.update(prev_hash.as_bytes());
                hasher.update(&canonical);
                Ok(hex::encode(hasher.finalize()))
            }
        }
    }

    #[cfg(test)]
    async fn tamper<F: FnOnce(&mut ChainedRecord)>(&self, index: usize, f: F) {
        let mut ring = self.ring.write().await;
        if let Some(record) = ring.records.get_mut(index) {
            f(record);
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn save(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut ring = self.ring.write().await;

        let prev_hash = ring.last_hash.clone();
        let hash = self.link_hash(&prev_hash, &event)?;
        ring.last_hash = hash.clone();
        ring.records.push_back(ChainedRecord { event, prev_hash, hash });

        while ring.records.len() > self.max_events {
            if let Some(evicted) = ring.records.pop_front() {
                debug!(event_id = %evicted.event.id, "Evicted oldest audit event");
            }
        }
        Ok(())
    }

    async fn query(&self, filters: &AuditQueryFilters) -> Result<Vec<AuditEvent>, AuditError> {
        let mut matched: Vec<AuditEvent> = {
            let ring = self.ring.read().await;
            // Newest insertions first so equal timestamps keep that order after the stable sort
            ring.records
                .iter()
                .rev()
                .filter(|r| filters.matches(&r.event))
                .map(|r| r.event.clone())
                .collect()
        };

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(matched
            .into_iter()
            .skip(filters.effective_offset())
            .take(filters.effective_limit())
            .collect())
    }

    async fn verify_integrity(&self) -> Result<Option<IntegrityReport>, AuditError> {
        self.verify_chain().await.map(Some)
    }
}
