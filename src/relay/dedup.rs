//! Duplicate suppression for inbound messages.
//!
//! VK retries callbacks it thinks were lost, and the same text sometimes
//! arrives twice under different ids. Both the message id and a content
//! fingerprint are tracked so either kind of replay is caught.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::info;

/// Why a message was (or wasn't) flagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    New,
    DuplicateId(i64),
    DuplicateContent(String),
}

impl DedupVerdict {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, DedupVerdict::New)
    }

    pub fn reason(&self) -> String {
        match self {
            DedupVerdict::New => "new_message".to_string(),
            DedupVerdict::DuplicateId(id) => format!("duplicate_id_{id}"),
            DedupVerdict::DuplicateContent(hash) => {
                format!("duplicate_content_{}", &hash[..8.min(hash.len())])
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupStats {
    pub active_message_ids: usize,
    pub active_content_hashes: usize,
    pub total_active: usize,
    pub max_age_seconds: i64,
    pub cleanup_interval_seconds: i64,
    pub last_cleanup: String,
    pub expire_content_hashes: bool,
}

pub struct Deduplicator {
    max_age: Duration,
    cleanup_interval: Duration,
    /// When false, content fingerprints are kept for the life of the process
    /// and only ids expire.
    expire_content_hashes: bool,
    processed_ids: HashMap<i64, DateTime<Utc>>,
    processed_hashes: HashMap<String, DateTime<Utc>>,
    last_cleanup: DateTime<Utc>,
}

impl Deduplicator {
    pub fn new(max_age_secs: i64, cleanup_interval_secs: i64, expire_content_hashes: bool) -> Self {
        Self::new_at(Utc::now(), max_age_secs, cleanup_interval_secs, expire_content_hashes)
    }

    pub fn new_at(
        now: DateTime<Utc>,
        max_age_secs: i64,
        cleanup_interval_secs: i64,
        expire_content_hashes: bool,
    ) -> Self {
        Self {
            max_age: Duration::seconds(max_age_secs),
            cleanup_interval: Duration::seconds(cleanup_interval_secs),
            expire_content_hashes,
            processed_ids: HashMap::new(),
            processed_hashes: HashMap::new(),
            last_cleanup: now,
        }
    }

    pub fn is_duplicate(
        &mut self,
        message_id: Option<i64>,
        text: &str,
        sender_id: Option<i64>,
        peer_id: Option<i64>,
    ) -> DedupVerdict {
        self.is_duplicate_at(Utc::now(), message_id, text, sender_id, peer_id)
    }

    /// Check and record a message. Recording happens in the same call as the
    /// check, so callers holding the lock get an atomic check-and-set.
    pub fn is_duplicate_at(
        &mut self,
        now: DateTime<Utc>,
        message_id: Option<i64>,
        text: &str,
        sender_id: Option<i64>,
        peer_id: Option<i64>,
    ) -> DedupVerdict {
        if now - self.last_cleanup > self.cleanup_interval {
            self.cleanup(now);
            self.last_cleanup = now;
        }

        if let Some(id) = message_id
            && self.processed_ids.contains_key(&id)
        {
            return DedupVerdict::DuplicateId(id);
        }

        // Fingerprints need all three parts; a message without sender or
        // peer is dropped later by validation anyway.
        if !text.is_empty()
            && let (Some(sender), Some(peer)) = (sender_id, peer_id)
        {
            let hash = fingerprint(text, sender, peer);
            if self.processed_hashes.contains_key(&hash) {
                return DedupVerdict::DuplicateContent(hash);
            }
            self.processed_hashes.insert(hash, now);
        }

        if let Some(id) = message_id {
            self.processed_ids.insert(id, now);
        }

        DedupVerdict::New
    }

    fn cleanup(&mut self, now: DateTime<Utc>) {
        let max_age = self.max_age;

        let before = self.processed_ids.len();
        self.processed_ids.retain(|_, seen| now - *seen <= max_age);
        let expired_ids = before - self.processed_ids.len();

        let mut expired_hashes = 0;
        if self.expire_content_hashes {
            let before = self.processed_hashes.len();
            self.processed_hashes.retain(|_, seen| now - *seen <= max_age);
            expired_hashes = before - self.processed_hashes.len();
        }

        if expired_ids + expired_hashes > 0 {
            info!("🧹 Dedup sweep: {} ids, {} hashes expired", expired_ids, expired_hashes);
        }
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            active_message_ids: self.processed_ids.len(),
            active_content_hashes: self.processed_hashes.len(),
            total_active: self.processed_ids.len() + self.processed_hashes.len(),
            max_age_seconds: self.max_age.num_seconds(),
            cleanup_interval_seconds: self.cleanup_interval.num_seconds(),
            last_cleanup: self.last_cleanup.to_rfc3339(),
            expire_content_hashes: self.expire_content_hashes,
        }
    }

    pub fn reset(&mut self) {
        self.processed_ids.clear();
        self.processed_hashes.clear();
        info!("🔄 Deduplicator reset");
    }
}

/// Deterministic content fingerprint over text and routing metadata.
pub fn fingerprint(text: &str, sender_id: i64, peer_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{text}_{sender_id}_{peer_id}").as_bytes());
    hex::encode(&hasher.finalize()[..16])
}
