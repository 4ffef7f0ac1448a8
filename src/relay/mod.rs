//! Inbound message pipeline: classification, stateful gates and the
//! collaborators replies go out through.

pub mod ambient;
pub mod backend;
pub mod dedup;
pub mod gigachat;
pub mod history;
pub mod hostile;
pub mod message;
pub mod preferences;
pub mod router;
pub mod search;
pub mod vk;

pub use message::InboundMessage;
pub use router::{Outcome, Router, RouterConfig, RouterStores};
