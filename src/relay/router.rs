//! Message router - decides what, if anything, to say in reply to one
//! inbound message.

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::relay::ambient::{AmbientCommentator, AmbientStats};
use crate::relay::backend::{LlmBackend, Messenger, SearchBackend};
use crate::relay::dedup::{DedupStats, Deduplicator};
use crate::relay::history::{HistoryEntry, HistoryStore, Role};
use crate::relay::hostile::{self, HostileResponder, HostileStats};
use crate::relay::message::{InboundMessage, preview};
use crate::relay::preferences::{COMMANDS_HELP, PreferenceStore, UserPreference};
use crate::relay::search;

/// Names the bot answers to. Matched case-insensitively as substrings.
pub const DEFAULT_ALIASES: &[&str] = &[
    "сота сил",
    "сота-сил",
    "сота",
    "соты",
    "сотя",
    "sota",
    "sota_sil",
    "альмсиви",
    "сехт",
    "хозяин механического города",
    "хозяин заводного города",
];

static MENTION_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[club(\d+)\|([^\]]*)\]").expect("valid mention regex"));

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub group_id: i64,
    pub system_prompt: String,
    pub message_max_age_secs: i64,
    pub aliases: Vec<String>,
}

impl RouterConfig {
    pub fn new(group_id: i64, system_prompt: String) -> Self {
        Self {
            group_id,
            system_prompt,
            message_max_age_secs: 60,
            aliases: DEFAULT_ALIASES.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// The stateful subsystems the router owns.
pub struct RouterStores {
    pub dedup: Deduplicator,
    pub hostile: HostileResponder,
    pub ambient: AmbientCommentator,
    pub preferences: PreferenceStore,
    pub history: HistoryStore,
}

/// The terminal action taken for one inbound message. At most one reply is
/// sent per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Duplicate(String),
    /// Missing text or sender.
    Invalid,
    Stale,
    DirectMessage,
    /// Not addressed to the bot and no ambient remark.
    Ignored,
    Ambient,
    Search,
    Setup,
    CommandList,
    Hostile,
    Llm,
}

impl Outcome {
    pub fn replied(&self) -> bool {
        matches!(
            self,
            Outcome::Ambient
                | Outcome::Search
                | Outcome::Setup
                | Outcome::CommandList
                | Outcome::Hostile
                | Outcome::Llm
        )
    }
}

pub struct Router {
    config: RouterConfig,
    dedup: Arc<Mutex<Deduplicator>>,
    hostile: Arc<Mutex<HostileResponder>>,
    ambient: Arc<Mutex<AmbientCommentator>>,
    preferences: Arc<Mutex<PreferenceStore>>,
    history: Arc<Mutex<HistoryStore>>,
    messenger: Arc<dyn Messenger>,
    llm: Arc<dyn LlmBackend>,
    search: Arc<dyn SearchBackend>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        stores: RouterStores,
        messenger: Arc<dyn Messenger>,
        llm: Arc<dyn LlmBackend>,
        search: Arc<dyn SearchBackend>,
    ) -> Self {
        Self {
            config,
            dedup: Arc::new(Mutex::new(stores.dedup)),
            hostile: Arc::new(Mutex::new(stores.hostile)),
            ambient: Arc::new(Mutex::new(stores.ambient)),
            preferences: Arc::new(Mutex::new(stores.preferences)),
            history: Arc::new(Mutex::new(stores.history)),
            messenger,
            llm,
            search,
        }
    }

    pub async fn handle(&self, msg: &InboundMessage) -> Outcome {
        self.handle_at(Utc::now(), msg).await
    }

    pub async fn handle_at(&self, now: DateTime<Utc>, msg: &InboundMessage) -> Outcome {
        let verdict = self.dedup.lock().await.is_duplicate_at(
            now,
            msg.message_id,
            &msg.text,
            msg.sender_id,
            msg.peer_id,
        );
        if verdict.is_duplicate() {
            info!("⏭️ Duplicate: {}", verdict.reason());
            return Outcome::Duplicate(verdict.reason());
        }

        let Some(sender_id) = msg.sender_id else {
            return Outcome::Invalid;
        };
        if msg.text.is_empty() {
            return Outcome::Invalid;
        }

        let age = now.timestamp() - msg.date;
        if age > self.config.message_max_age_secs {
            info!("⏰ Stale message ({age}s), skipping");
            return Outcome::Stale;
        }

        let (Some(peer_id), true) = (msg.peer_id, msg.is_group_conversation()) else {
            info!("👤 Direct message from {sender_id}, skipping");
            return Outcome::DirectMessage;
        };
        let conversation_id = peer_id.to_string();
        info!("💬 Message in conversation {conversation_id}");

        let text = clean_mentions(&msg.text, self.config.group_id);

        if !self.is_addressed(msg) {
            return self.handle_unaddressed(now, peer_id, &text).await;
        }

        let user_name = self.messenger.get_display_name(sender_id).await;
        info!("📝 {user_name}: {}", preview(&text, 100));

        if search::is_search_request(&text) {
            let query = search::extract_search_query(&text, &self.config.aliases);
            info!("🔍 Search query: {query}");
            let results = self.search.search(&query).await;
            let reply = search::format_reply(results.as_deref());
            self.history
                .lock()
                .await
                .append(&conversation_id, Role::Assistant, &reply);
            self.messenger.send(peer_id, &reply).await;
            return Outcome::Search;
        }

        let setup_reply = self
            .preferences
            .lock()
            .await
            .parse_setup_command(sender_id, &text);
        if let Some(reply) = setup_reply {
            info!("🔧 Setup command: {reply}");
            self.messenger.send(peer_id, &reply).await;
            return Outcome::Setup;
        }

        if is_command_list_request(&text) {
            info!("🔧 Showing setup commands");
            self.messenger.send(peer_id, COMMANDS_HELP).await;
            return Outcome::CommandList;
        }

        if hostile::is_aggressive(&text) {
            info!("⚠️ Aggressive message from {user_name}");
            // Check-and-set in one locked call.
            let retort = self.hostile.lock().await.generate_response_at(now);
            match retort {
                Some(retort) => {
                    info!("💢 Retort: {}", preview(&retort, 50));
                    self.messenger.send(peer_id, &retort).await;
                    return Outcome::Hostile;
                }
                None => info!("⏰ Retort on cooldown, answering normally"),
            }
        }

        self.reply_with_llm(peer_id, &conversation_id, sender_id, &text)
            .await
    }

    async fn handle_unaddressed(&self, now: DateTime<Utc>, peer_id: i64, text: &str) -> Outcome {
        let comment = {
            let mut ambient = self.ambient.lock().await;
            if ambient.should_comment_at(now, text) {
                ambient.generate_comment_at(now, text)
            } else {
                None
            }
        };

        match comment {
            Some(comment) => {
                info!("🎲 Ambient remark: {comment}");
                self.messenger.send(peer_id, &comment).await;
                Outcome::Ambient
            }
            None => {
                debug!("Not addressed, no remark");
                Outcome::Ignored
            }
        }
    }

    async fn reply_with_llm(
        &self,
        peer_id: i64,
        conversation_id: &str,
        sender_id: i64,
        text: &str,
    ) -> Outcome {
        let prompt = {
            let prefs = self.preferences.lock().await;
            if let Some(special) = prefs.special_user(sender_id) {
                info!("👑 Special user: {}", special.name);
            }
            prefs.get_personalized_prompt(sender_id, &self.config.system_prompt)
        };

        let prior = {
            let mut history = self.history.lock().await;
            let prior = history.get(conversation_id);
            history.append(conversation_id, Role::User, text);
            prior
        };

        let reply = self
            .llm
            .complete(text, conversation_id, &prompt, &prior)
            .await;
        let reply = self.preferences.lock().await.apply_honorific(sender_id, &reply);

        self.history
            .lock()
            .await
            .append(conversation_id, Role::Assistant, &reply);
        self.messenger.send(peer_id, &reply).await;
        Outcome::Llm
    }

    /// Alias mention, mention markup, or a reply to / forward of one of the
    /// bot's own messages.
    fn is_addressed(&self, msg: &InboundMessage) -> bool {
        let lower = msg.text.to_lowercase();
        let group = self.config.group_id;

        if lower.contains(&format!("[club{group}|")) || lower.contains(&format!("@club{group}")) {
            return true;
        }
        if let Some(alias) = self
            .config
            .aliases
            .iter()
            .find(|a| !a.is_empty() && lower.contains(&a.to_lowercase()))
        {
            debug!("Mention: {alias}");
            return true;
        }

        let bot_id = -group;
        if msg.reply_to.as_ref().is_some_and(|r| r.from_id == bot_id) {
            debug!("Reply to the bot");
            return true;
        }
        msg.forwarded.iter().any(|f| f.from_id == bot_id)
    }

    pub async fn dedup_stats(&self) -> DedupStats {
        self.dedup.lock().await.stats()
    }

    pub async fn hostile_stats(&self) -> HostileStats {
        self.hostile.lock().await.stats()
    }

    pub async fn ambient_stats(&self) -> AmbientStats {
        self.ambient.lock().await.stats()
    }

    pub async fn reset_dedup(&self) {
        self.dedup.lock().await.reset();
    }

    pub async fn conversation_history(&self, conversation_id: &str) -> Vec<HistoryEntry> {
        self.history.lock().await.get(conversation_id)
    }

    pub async fn user_preferences(&self, user_id: i64) -> UserPreference {
        self.preferences.lock().await.get_preferences(user_id)
    }
}

/// Replace `[club<id>|text]` markup for this group with its display text.
pub fn clean_mentions(text: &str, group_id: i64) -> String {
    MENTION_MARKUP
        .replace_all(text, |caps: &Captures| {
            if caps[1] == group_id.to_string() {
                caps[2].to_string()
            } else {
                caps[0].to_string()
            }
        })
        .trim()
        .to_string()
}

fn is_command_list_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("настройки") && (lower.contains("команды") || lower.contains("что"))
}
