//! Hostile message detection and scripted retorts.
//!
//! Classification is regex matching over lowercased text. Retorts are rate
//! limited by one process-wide cooldown that survives restarts.

use chrono::{DateTime, Duration, Utc};
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::error;

use crate::state;

/// Patterns are matched against lowercased text. `\b` is Unicode-aware in the
/// regex crate, so word boundaries work for Cyrillic.
const AGGRESSIVE_PATTERNS: &[&str] = &[
    // Direct insults
    r"\b(заткн[иу]|заткнись|заткни)\b",
    r"\b(иди\s+нахуй|иди\s+в\s+жопу|иди\s+в\s+ж\S*)\b",
    r"\b(пош[её]л\s+нахуй|пош[её]л\s+в\s+жопу)\b",
    r"\b(пошли\s+нахуй|пошли\s+в\s+жопу)\b",
    r"\b(у[её]бок|у[её]бище|мудак|мудок|дурак|дебил|идиот|придурок|тупой|глупый|ничтожество)\b",
    r"\b(лох|лошара|неудачник|неудачница)\b",
    r"\b(слабоумный|тупоголовый|безмозглый)\b",
    // Silencing commands
    r"\b(замолчи|молчи|молчать|тише|тише\s+там)\b",
    r"\b(не\s+пиши|не\s+отвечай|не\s+комментируй)\b",
    r"\b(не\s+мешай|не\s+вмешивайся)\b",
    // Curses
    r"\b(чтоб\s+ты\s+сдох|чтоб\s+ты\s+сгнил|чтоб\s+ты\s+сгорел)\b",
    r"\b(сдохни|умри|подыхай)\b",
    r"\b(заткни\s+свою\s+жопу|закрой\s+свою\s+жопу)\b",
    // Disparaging comparisons
    r"\b(как\s+животное|как\s+скот|как\s+свинья)\b",
    r"\b(хуже\s+животного|хуже\s+скот[ау])\b",
    r"\b(примитивный|примитив)\b",
    r"\b(как\s+аргонианин|как\s+хайм|как\s+каджит)\b",
    r"\b(хуже\s+аргонианина|хуже\s+хайма|хуже\s+каджита)\b",
    // Belittling the bot
    r"\b(тупой\s+бот|глупый\s+бот|идиотский\s+бот)\b",
    r"\b(бесполезный|бессмысленный)\b",
    r"\b(отстой|хрень|гавно|дерьмо)\b",
    r"\b(ты\s+никч[её]мный|ты\s+бесполезный)\b",
    r"\b(ты\s+ничего\s+не\s+умеешь|ты\s+ничего\s+не\s+знаешь)\b",
    r"\b(ты\s+никто|ты\s+ничто)\b",
];

const HOSTILE_RESPONSES: &[&str] = &[
    "Иди поешь грибов Вварденфелла, слышал они отсталость лечат.",
    "Грибы Вварденфелла помогут твоему слабоумию. Иди найди их.",
    "Над твоей эрудицией даже Аргониане хихикают.",
    "Твой уровень знаний заставил бы даже Аргонианина усомниться в эволюции.",
    "К сожалению Двемеры не создали механизм, который бы компенсировал твоё слабоумие.",
    "Даже древние двемеры не смогли бы починить твою эрудицию.",
    "Увы я не способен вести диалог с настолько низшим подобием разума. Позови кого-то умнее.",
    "Мой разум не опускается до твоего уровня мышления.",
    "Ты говоришь на языке низших существ. Впечатляет твоё умение подражать неразумным.",
    "Твой словарь больше подходит для общения с Каджитами.",
    "Я бы препарировал тебя, вставив шестерёнки внутрь, а в жопу заводной ключик. Быть может тогда ты смог бы меня развлечь.",
    "Твоё тело идеально подошло бы для моих механических экспериментов.",
    "Твой уровень интеллекта сопоставим с уровнем двемерского мусора.",
    "Даже в Заводном городе нашли бы более разумное занятие.",
    "Твоя эрудиция заставила бы содрогнуться даже Драконов.",
    "Говоришь как представитель низшей касты Тамриэля.",
    "Твои слова достойны лишь внимания гоблинов.",
    "Эволюция явно над тобой не потрудилась.",
    "Твой разум застрял где-то в Первой Эре.",
    "Даже механические големы мыслят логичнее тебя.",
    "Твоя бестолковость поражает даже меня.",
    "Иди изучи что-нибудь полезное вместо того чтобы со мной разговаривать.",
];

static AGGRESSIVE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    AGGRESSIVE_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Whether the text reads as an attack on the bot.
pub fn is_aggressive(text: &str) -> bool {
    let lower = text.to_lowercase();
    AGGRESSIVE_REGEXES.iter().any(|re| re.is_match(&lower))
}

pub fn scripted_responses() -> &'static [&'static str] {
    HOSTILE_RESPONSES
}

/// On-disk shape, kept compatible with older state files.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HostileState {
    #[serde(default)]
    last_response_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostileStats {
    pub last_response_time: f64,
    pub time_since_last_response: i64,
    pub can_respond: bool,
    pub next_response_in: i64,
    pub cooldown_minutes: i64,
}

pub struct HostileResponder {
    cooldown: Duration,
    last_response: Option<DateTime<Utc>>,
    state_path: Option<PathBuf>,
}

impl HostileResponder {
    /// In-memory responder (nothing persisted).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs),
            last_response: None,
            state_path: None,
        }
    }

    /// Responder whose cooldown timestamp is loaded from and saved to `path`.
    pub fn load_or_new(path: PathBuf, cooldown_secs: i64) -> Self {
        let saved: HostileState = state::load_json_or_default(&path);
        let last_response = if saved.last_response_time > 0.0 {
            DateTime::from_timestamp_millis((saved.last_response_time * 1000.0) as i64)
        } else {
            None
        };

        Self {
            cooldown: Duration::seconds(cooldown_secs),
            last_response,
            state_path: Some(path),
        }
    }

    pub fn can_respond_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_response {
            Some(last) => now - last >= self.cooldown,
            None => true,
        }
    }

    pub fn generate_response(&mut self) -> Option<String> {
        self.generate_response_at(Utc::now())
    }

    /// Pick a retort if the cooldown has elapsed, stamping the cooldown in the
    /// same call. Returns `None` while cooling down.
    pub fn generate_response_at(&mut self, now: DateTime<Utc>) -> Option<String> {
        if !self.can_respond_at(now) {
            return None;
        }

        let response = HOSTILE_RESPONSES.choose(&mut rand::rng())?.to_string();
        self.last_response = Some(now);
        self.save();
        Some(response)
    }

    fn save(&self) {
        let Some(ref path) = self.state_path else {
            return;
        };
        let data = HostileState {
            last_response_time: self
                .last_response
                .map(|t| t.timestamp_millis() as f64 / 1000.0)
                .unwrap_or(0.0),
        };
        if let Err(e) = state::save_json(path, &data) {
            error!("Failed to save hostile cooldown: {e}");
        }
    }

    pub fn stats(&self) -> HostileStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> HostileStats {
        let since = self.last_response.map(|t| (now - t).num_seconds());
        let cooldown = self.cooldown.num_seconds();

        HostileStats {
            last_response_time: self
                .last_response
                .map(|t| t.timestamp_millis() as f64 / 1000.0)
                .unwrap_or(0.0),
            time_since_last_response: since.unwrap_or(now.timestamp()),
            can_respond: self.can_respond_at(now),
            next_response_in: since.map(|s| (cooldown - s).max(0)).unwrap_or(0),
            cooldown_minutes: cooldown / 60,
        }
    }
}
