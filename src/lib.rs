//! "Сота Сил": a persona bot for VK group conversations.
//!
//! VK delivers events to the webhook in [`server`]; each message goes through
//! the [`relay::Router`] pipeline, which answers via GigaChat, web search,
//! scripted lines or not at all.

pub mod config;
pub mod confirmation;
pub mod relay;
pub mod server;
pub mod state;
pub mod vk_log;
