//! Tracing layer that mirrors the bot's own log lines into a VK conversation.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::relay::vk::VkClient;

/// VK rejects messages above 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED_LINES: usize = 50;

/// Log message with priority.
#[derive(Debug, PartialEq)]
enum LogMessage {
    /// WARN/ERROR - sent immediately
    Urgent(String),
    /// INFO - batched
    Info(String),
}

pub struct VkLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl VkLogLayer {
    pub fn new(client: VkClient, peer_id: i64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(&client, peer_id, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= MAX_BUFFERED_LINES {
                                    flush_buffer(&client, peer_id, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        flush_buffer(&client, peer_id, &mut info_buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

/// Sends go through `send_raw`, which emits no tracing events of its own.
async fn send_log(client: &VkClient, peer_id: i64, text: &str) {
    let text = truncate(text);
    if let Err(e) = client.send_raw(peer_id, &text).await {
        eprintln!("Failed to send log to VK: {e}");
    }
}

async fn flush_buffer(client: &VkClient, peer_id: i64, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(client, peer_id, &combined).await;
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

/// Only the bot's own INFO/WARN/ERROR lines are forwarded. Library events
/// (hyper, reqwest) would otherwise loop back through our own sends.
fn is_forwarded(target: &str, level: Level) -> bool {
    target.starts_with("sotha") && level <= Level::INFO
}

fn classify(level: Level, message: String) -> LogMessage {
    match level {
        Level::ERROR => LogMessage::Urgent(format!("❌ {message}")),
        Level::WARN => LogMessage::Urgent(format!("⚠️ {message}")),
        _ => LogMessage::Info(message),
    }
}

impl<S: Subscriber> Layer<S> for VkLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !is_forwarded(metadata.target(), *metadata.level()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(classify(*metadata.level(), visitor.message)).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
