//! Inbound message types and VK Callback API payload parsing.

use serde::{Deserialize, Serialize};

/// Peer ids above this value are group conversations; anything below is a
/// direct chat with a user (or a community).
pub const GROUP_PEER_THRESHOLD: i64 = 2_000_000_000;

/// A message the inbound one replies to or forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub from_id: i64,
    #[serde(default)]
    pub text: String,
}

/// One inbound chat message, as received from the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message id. VK sends `0` for many conversation messages; that
    /// is normalized to `None`.
    pub message_id: Option<i64>,
    pub text: String,
    pub sender_id: Option<i64>,
    pub peer_id: Option<i64>,
    /// Unix seconds.
    pub date: i64,
    pub reply_to: Option<MessageRef>,
    pub forwarded: Vec<MessageRef>,
}

impl InboundMessage {
    /// Conversation key used by the history store.
    pub fn conversation_id(&self) -> Option<String> {
        self.peer_id.map(|p| p.to_string())
    }

    pub fn is_group_conversation(&self) -> bool {
        self.peer_id.is_some_and(|p| p > GROUP_PEER_THRESHOLD)
    }
}

/// `message_new` object as VK sends it.
#[derive(Debug, Deserialize)]
struct VkMessage {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    text: String,
    from_id: Option<i64>,
    peer_id: Option<i64>,
    #[serde(default)]
    date: i64,
    reply_message: Option<MessageRef>,
    #[serde(default)]
    fwd_messages: Vec<MessageRef>,
}

impl From<VkMessage> for InboundMessage {
    fn from(msg: VkMessage) -> Self {
        Self {
            message_id: if msg.id == 0 { None } else { Some(msg.id) },
            text: msg.text.trim().to_string(),
            sender_id: msg.from_id.filter(|&id| id != 0),
            peer_id: msg.peer_id,
            date: msg.date,
            reply_to: msg.reply_message,
            forwarded: msg.fwd_messages,
        }
    }
}

/// Parse the `object` of a `message_new` event.
///
/// API 5.103+ wraps the message as `object.message`; older versions put the
/// message fields directly in `object`.
pub fn parse_message_new(object: &serde_json::Value) -> Result<InboundMessage, String> {
    let raw = object.get("message").unwrap_or(object);
    let msg: VkMessage =
        serde_json::from_value(raw.clone()).map_err(|e| format!("Bad message_new payload: {e}"))?;
    Ok(msg.into())
}

/// Safely truncate a string to at most `max_chars` characters.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}...")
}
