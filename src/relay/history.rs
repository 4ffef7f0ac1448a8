//! Per-conversation message history.
//!
//! Each conversation keeps its most recent `limit` entries. Every mutation is
//! written straight to disk.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

use crate::state;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// RFC 3339, or a naive ISO timestamp (older files) read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

pub struct HistoryStore {
    conversations: HashMap<String, Vec<HistoryEntry>>,
    limit: usize,
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// In-memory store (nothing persisted).
    pub fn new(limit: usize) -> Self {
        Self {
            conversations: HashMap::new(),
            limit: limit.max(1),
            path: None,
        }
    }

    pub fn load_or_new(path: PathBuf, limit: usize) -> Self {
        let conversations: HashMap<String, Vec<HistoryEntry>> = state::load_json_or_default(&path);
        info!("Loaded history for {} conversation(s)", conversations.len());
        Self {
            conversations,
            limit: limit.max(1),
            path: Some(path),
        }
    }

    fn save(&self) {
        if let Some(ref path) = self.path
            && let Err(e) = state::save_json(path, &self.conversations)
        {
            error!("Failed to save history: {e}");
        }
    }

    pub fn append(&mut self, conversation_id: &str, role: Role, content: &str) {
        let entries = self.conversations.entry(conversation_id.to_string()).or_default();
        entries.push(HistoryEntry {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
        self.save();
    }

    /// Entries for a conversation, oldest first.
    pub fn get(&self, conversation_id: &str) -> Vec<HistoryEntry> {
        self.conversations.get(conversation_id).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self, conversation_id: &str) {
        if let Some(entries) = self.conversations.get_mut(conversation_id) {
            entries.clear();
            self.save();
        }
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}
