//! External collaborators the router talks to.
//!
//! Each trait hides one network service so the pipeline can be driven with
//! in-memory fakes in tests.

use async_trait::async_trait;
use serde::Deserialize;

use crate::relay::history::HistoryEntry;

/// Outbound delivery and user lookup on the messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `text` to a conversation. Returns false on any failure.
    async fn send(&self, peer_id: i64, text: &str) -> bool;

    /// First name of a user, or a friendly default when the lookup fails.
    async fn get_display_name(&self, user_id: i64) -> String;
}

/// Language model completion.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Always yields text: faults are turned into a fixed apology.
    async fn complete(
        &self,
        message: &str,
        conversation_id: &str,
        system_prompt: &str,
        history: &[HistoryEntry],
    ) -> String;
}

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

/// Web search.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ranked results, or `None` when the search could not be performed.
    async fn search(&self, query: &str) -> Option<Vec<SearchHit>>;
}
