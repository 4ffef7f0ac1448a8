//! Callback API confirmation code.
//!
//! VK checks a new webhook URL by sending a `confirmation` event and expecting
//! the group's code as the plain-text reply. The code is persisted so it
//! survives restarts and can be changed at runtime.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info};

use crate::state;

pub const ENV_VAR: &str = "VK_CONFIRMATION_CODE";

const RETRY_WINDOW_SECS: i64 = 300;
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCode {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    last_attempt: i64,
    #[serde(default)]
    attempt_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationStatus {
    pub has_code: bool,
    pub code: Option<String>,
    pub last_attempt: i64,
    pub attempt_count: u32,
    pub can_attempt: bool,
}

pub struct ConfirmationStore {
    stored: StoredCode,
    path: Option<PathBuf>,
}

impl ConfirmationStore {
    /// In-memory store (nothing persisted).
    pub fn new(code: Option<String>) -> Self {
        Self {
            stored: StoredCode {
                code,
                ..Default::default()
            },
            path: None,
        }
    }

    /// Load the persisted code. `seed` is used when the file holds none.
    pub fn load_or_new(path: PathBuf, seed: Option<String>) -> Self {
        let mut stored: StoredCode = state::load_json_or_default(&path);
        match stored.code {
            Some(ref code) => info!("📋 Loaded confirmation code: {code}"),
            None => stored.code = seed,
        }
        Self {
            stored,
            path: Some(path),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.stored.code.as_deref()
    }

    pub fn save_code(&mut self, code: &str) -> bool {
        self.save_code_at(Utc::now().timestamp(), code)
    }

    pub fn save_code_at(&mut self, now: i64, code: &str) -> bool {
        let updated = StoredCode {
            code: Some(code.to_string()),
            last_attempt: now,
            attempt_count: self.stored.attempt_count + 1,
        };

        if let Some(ref path) = self.path
            && let Err(e) = state::save_json(path, &updated)
        {
            error!("❌ Failed to save confirmation code: {e}");
            return false;
        }

        self.stored = updated;
        info!("💾 Saved confirmation code: {code}");
        true
    }

    /// Adopt `candidate` when it is set and differs from the stored code.
    pub fn update_code_from(&mut self, candidate: Option<String>) -> bool {
        match candidate {
            Some(code) if !code.trim().is_empty() && self.code() != Some(code.trim()) => {
                let code = code.trim().to_string();
                info!("🔄 Confirmation code updated from {ENV_VAR}: {code}");
                self.save_code(&code)
            }
            _ => false,
        }
    }

    pub fn update_code_from_env(&mut self) -> bool {
        self.update_code_from(std::env::var(ENV_VAR).ok())
    }

    pub fn can_attempt_at(&self, now: i64) -> bool {
        now - self.stored.last_attempt > RETRY_WINDOW_SECS || self.stored.attempt_count < MAX_ATTEMPTS
    }

    pub fn status(&self) -> ConfirmationStatus {
        self.status_at(Utc::now().timestamp())
    }

    pub fn status_at(&self, now: i64) -> ConfirmationStatus {
        ConfirmationStatus {
            has_code: self.stored.code.is_some(),
            code: self.stored.code.clone(),
            last_attempt: self.stored.last_attempt,
            attempt_count: self.stored.attempt_count,
            can_attempt: self.can_attempt_at(now),
        }
    }

    pub fn setup_instructions(&self) -> String {
        match self.code() {
            Some(code) => format!(
                "🔧 Настройка кода подтверждения:\n\n\
                 Текущий код: {code}\n\n\
                 Для обновления кода:\n\
                 1. В настройках Callback API ВКонтакте скопируйте новый код подтверждения\n\
                 2. Выполните: update_confirmation <код>\n\
                 3. Или задайте переменную окружения {ENV_VAR}=<код>\n\n\
                 Статус: ✅ Настроен"
            ),
            None => format!(
                "🔧 Настройка кода подтверждения:\n\n\
                 ❌ Код подтверждения не настроен!\n\n\
                 Для настройки:\n\
                 1. В настройках Callback API ВКонтакте будет показан код подтверждения\n\
                 2. Выполните: update_confirmation <код>\n\
                 3. Или задайте переменную окружения {ENV_VAR}=<код> и перезапустите бота\n\n\
                 После сохранения код переживает перезапуски."
            ),
        }
    }
}
