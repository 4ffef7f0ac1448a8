//! JSON state files.
//!
//! Every persisted store (history, preferences, hostile cooldown, confirmation
//! code) is one JSON file. A missing or corrupt file never stops the bot: it
//! degrades to the store's empty default.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{info, warn};

/// Load a state file, falling back to `T::default()` when it is absent or unreadable.
pub fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        info!("No state file at {:?}, starting fresh", path);
        return T::default();
    }

    match load_json(path) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to load {:?}: {e}", path);
            T::default()
        }
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("Failed to read: {e}"))?;
    serde_json::from_str(&json).map_err(|e| format!("Failed to parse: {e}"))
}

/// Write a state file. The write goes to a sibling temp file first and is
/// renamed into place, so a crash mid-write leaves the previous version.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize: {e}"))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| format!("Failed to create dir: {e}"))?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| format!("Failed to write: {e}"))?;
    std::fs::rename(&tmp, path).map_err(|e| format!("Failed to replace: {e}"))?;
    Ok(())
}
