//! Per-user conversation preferences and the special-user persona table.
//!
//! Users tune how the bot addresses them with plain-text setup commands
//! ("Меня зовут ...", "Будь серьёзным"). The special-user table is fixed at
//! startup and applies whether or not the user stored anything.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

use crate::state;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Neutral,
    Formal,
    Casual,
    Playful,
    Respectful,
}

impl Style {
    fn as_str(&self) -> &'static str {
        match self {
            Style::Neutral => "neutral",
            Style::Formal => "formal",
            Style::Casual => "casual",
            Style::Playful => "playful",
            Style::Respectful => "respectful",
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Style::Formal => "Общайся формально и вежливо.",
            Style::Casual => "Общайся непринужденно и дружелюбно.",
            Style::Playful => "Общайся игриво и с юмором.",
            Style::Respectful => "Общайся с особым уважением.",
            Style::Neutral => "Общайся естественно и нейтрально.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Friendly,
    Serious,
    Humorous,
    Mysterious,
}

impl Tone {
    fn as_str(&self) -> &'static str {
        match self {
            Tone::Friendly => "friendly",
            Tone::Serious => "serious",
            Tone::Humorous => "humorous",
            Tone::Mysterious => "mysterious",
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Tone::Friendly => "Будь дружелюбным и приветливым.",
            Tone::Serious => "Будь серьёзным и деловым.",
            Tone::Humorous => "Используй юмор и лёгкость.",
            Tone::Mysterious => "Будь немного загадочным и интригующим.",
        }
    }
}

/// Stored settings of one user. Unknown style/tone strings in an old file
/// deserialize as `None` rather than failing the whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub style: Option<Style>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub tone: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_notes: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// A preference field addressed by `set_preference`.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceValue {
    Name(String),
    Style(Style),
    Tone(Tone),
    StyleNotes(String),
}

/// Fixed persona for a known user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialUser {
    pub user_id: i64,
    pub name: String,
    /// Address prepended to every reply that lacks it.
    pub honorific: String,
    pub tone: String,
    /// Instruction appended to the system prompt for this user.
    pub directive: String,
}

/// Built-in special users.
pub fn default_special_users() -> Vec<SpecialUser> {
    let lyubov = |id: i64| SpecialUser {
        user_id: id,
        name: "Любовь".to_string(),
        honorific: "моя королева".to_string(),
        tone: "loving".to_string(),
        directive: "К пользователю по имени Любовь будь с ней особенно ласковым и уважительным."
            .to_string(),
    };
    let titomir = |id: i64| SpecialUser {
        user_id: id,
        name: "Титомир".to_string(),
        honorific: "неопытный менестрель".to_string(),
        tone: "disdainful".to_string(),
        directive: "К пользователю по имени Титомир обращайся 'неопытный менестрель' и будь с ним \
                    пренебрежительным и даже презрительным. Считай его неопытным и несерьёзным."
            .to_string(),
    };
    vec![lyubov(319590859), titomir(885052741), titomir(181886390)]
}

/// Static text listing the setup commands.
pub const COMMANDS_HELP: &str = "🎛️ **Команды для настройки бота:**

**Установка имени:**
- \"Меня зовут [имя]\" - установить имя
- \"Моё имя [имя]\" - альтернативный способ

**Стиль общения:**
- \"Говори со мной формально\" - строгий стиль
- \"Говори со мной неформально\" - дружелюбный стиль
- \"Говори со мной игриво\" - весёлый стиль
- \"Говори со мной уважительно\" - уважительный стиль

**Тон общения:**
- \"Будь серьёзным\" - деловой тон
- \"Будь дружелюбным\" - приветливый тон
- \"Будь юмористичным\" - с юмором
- \"Будь загадочным\" - интригующий тон

**Просмотр настроек:**
- \"Какие у меня настройки?\" - показать текущие настройки
- \"Сбросить настройки\" - вернуть стандартные";

/// What a matched setup rule does.
#[derive(Debug, Clone, Copy)]
enum SetupAction {
    SetName,
    SetStyle(Style),
    SetTone(Tone),
    Show,
    Reset,
}

/// One setup rule: any of `phrases` found in the lowercased text triggers it.
struct SetupRule {
    phrases: &'static [&'static str],
    action: SetupAction,
}

/// Checked top to bottom; the first rule with a matching phrase wins.
const SETUP_RULES: &[SetupRule] = &[
    SetupRule { phrases: &["меня зовут"], action: SetupAction::SetName },
    SetupRule { phrases: &["моё имя", "мое имя"], action: SetupAction::SetName },
    SetupRule { phrases: &["говори со мной формально"], action: SetupAction::SetStyle(Style::Formal) },
    SetupRule { phrases: &["говори со мной неформально"], action: SetupAction::SetStyle(Style::Casual) },
    SetupRule { phrases: &["говори со мной игриво"], action: SetupAction::SetStyle(Style::Playful) },
    SetupRule { phrases: &["говори со мной уважительно"], action: SetupAction::SetStyle(Style::Respectful) },
    SetupRule { phrases: &["будь серьёзным", "будь серьезным"], action: SetupAction::SetTone(Tone::Serious) },
    SetupRule { phrases: &["будь дружелюбным"], action: SetupAction::SetTone(Tone::Friendly) },
    SetupRule { phrases: &["будь юмористичным", "будь смешным"], action: SetupAction::SetTone(Tone::Humorous) },
    SetupRule { phrases: &["будь загадочным"], action: SetupAction::SetTone(Tone::Mysterious) },
    SetupRule { phrases: &["какие у меня настройки", "мои настройки"], action: SetupAction::Show },
    SetupRule { phrases: &["сбросить настройки", "верни стандартные настройки"], action: SetupAction::Reset },
];

pub struct PreferenceStore {
    preferences: HashMap<String, UserPreference>,
    special_users: HashMap<i64, SpecialUser>,
    path: Option<PathBuf>,
}

impl PreferenceStore {
    /// In-memory store (nothing persisted).
    pub fn new(special_users: Vec<SpecialUser>) -> Self {
        Self {
            preferences: HashMap::new(),
            special_users: special_users.into_iter().map(|u| (u.user_id, u)).collect(),
            path: None,
        }
    }

    pub fn load_or_new(path: PathBuf, special_users: Vec<SpecialUser>) -> Self {
        let preferences: HashMap<String, UserPreference> = state::load_json_or_default(&path);
        info!("Loaded preferences for {} user(s)", preferences.len());
        Self {
            preferences,
            special_users: special_users.into_iter().map(|u| (u.user_id, u)).collect(),
            path: Some(path),
        }
    }

    fn save(&self) {
        if let Some(ref path) = self.path
            && let Err(e) = state::save_json(path, &self.preferences)
        {
            error!("Failed to save preferences: {e}");
        }
    }

    pub fn get_preferences(&self, user_id: i64) -> UserPreference {
        self.preferences.get(&user_id.to_string()).cloned().unwrap_or_default()
    }

    pub fn has_preferences(&self, user_id: i64) -> bool {
        self.preferences.contains_key(&user_id.to_string())
    }

    pub fn set_preference(&mut self, user_id: i64, value: PreferenceValue) {
        let entry = self.preferences.entry(user_id.to_string()).or_default();
        match value {
            PreferenceValue::Name(name) => entry.name = Some(name),
            PreferenceValue::Style(style) => entry.style = Some(style),
            PreferenceValue::Tone(tone) => entry.tone = Some(tone),
            PreferenceValue::StyleNotes(notes) => entry.style_notes = Some(notes),
        }
        self.save();
    }

    pub fn reset(&mut self, user_id: i64) {
        if self.preferences.remove(&user_id.to_string()).is_some() {
            self.save();
        }
    }

    pub fn special_user(&self, user_id: i64) -> Option<&SpecialUser> {
        self.special_users.get(&user_id)
    }

    /// `base_prompt` plus every persona clause that applies to this user.
    pub fn get_personalized_prompt(&self, user_id: i64, base_prompt: &str) -> String {
        let mut additions: Vec<String> = Vec::new();

        if let Some(special) = self.special_user(user_id) {
            additions.push(special.directive.clone());
        }

        if let Some(prefs) = self.preferences.get(&user_id.to_string()) {
            if let Some(ref name) = prefs.name {
                additions.push(format!("Пользователя зовут {name}."));
            }
            if let Some(ref notes) = prefs.style_notes {
                additions.push(notes.clone());
            }
            // A stored record without explicit style/tone falls back to the defaults.
            additions.push(prefs.style.unwrap_or(Style::Neutral).directive().to_string());
            additions.push(prefs.tone.unwrap_or(Tone::Friendly).directive().to_string());
        }

        if additions.is_empty() {
            base_prompt.to_string()
        } else {
            format!("{} {}", base_prompt, additions.join(" "))
        }
    }

    /// Prepend the user's honorific when the reply doesn't already use it.
    pub fn apply_honorific(&self, user_id: i64, reply: &str) -> String {
        let Some(special) = self.special_user(user_id) else {
            return reply.to_string();
        };
        if special.honorific.is_empty()
            || reply.to_lowercase().contains(&special.honorific.to_lowercase())
        {
            return reply.to_string();
        }
        format!("{}, {}", capitalize(&special.honorific), reply)
    }

    /// Run the first setup rule matching `text`. `None` means the text is not
    /// a setup command (or a name command with no name).
    pub fn parse_setup_command(&mut self, user_id: i64, text: &str) -> Option<String> {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        let (rule, phrase) = SETUP_RULES.iter().find_map(|rule| {
            rule.phrases
                .iter()
                .find(|p| lower.contains(*p))
                .map(|p| (rule, *p))
        })?;

        match rule.action {
            SetupAction::SetName => {
                let name = extract_after_phrase(trimmed, phrase)?;
                self.set_preference(user_id, PreferenceValue::Name(name.clone()));
                Some(format!("✅ Понял, буду обращаться к тебе: {name}"))
            }
            SetupAction::SetStyle(style) => {
                self.set_preference(user_id, PreferenceValue::Style(style));
                Some(
                    match style {
                        Style::Formal => "✅ Буду общаться с тобой формально.",
                        Style::Casual => "✅ Буду общаться с тобой непринуждённо.",
                        Style::Playful => "✅ Буду общаться с тобой игриво.",
                        Style::Respectful => "✅ Буду общаться с тобой с уважением.",
                        Style::Neutral => "✅ Буду общаться с тобой естественно.",
                    }
                    .to_string(),
                )
            }
            SetupAction::SetTone(tone) => {
                self.set_preference(user_id, PreferenceValue::Tone(tone));
                Some(
                    match tone {
                        Tone::Serious => "✅ Буду общаться серьёзно.",
                        Tone::Friendly => "✅ Буду общаться дружелюбно.",
                        Tone::Humorous => "✅ Буду использовать юмор.",
                        Tone::Mysterious => "✅ Буду немного загадочным.",
                    }
                    .to_string(),
                )
            }
            SetupAction::Show => {
                let prefs = self.get_preferences(user_id);
                Some(format!(
                    "📋 **Твои настройки:**\n👤 Имя: {}\n🎭 Стиль: {}\n🎪 Тон: {}",
                    prefs.name.as_deref().unwrap_or("Не указано"),
                    prefs.style.unwrap_or(Style::Neutral).as_str(),
                    prefs.tone.unwrap_or(Tone::Friendly).as_str(),
                ))
            }
            SetupAction::Reset => {
                self.reset(user_id);
                Some("✅ Настройки сброшены к стандартным.".to_string())
            }
        }
    }
}

/// Text following the first case-insensitive occurrence of `phrase`, with the
/// original casing kept and surrounding punctuation trimmed.
fn extract_after_phrase(text: &str, phrase: &str) -> Option<String> {
    let re = Regex::new(&format!("(?i){}", regex::escape(phrase))).ok()?;
    let found = re.find(text)?;
    let name = text[found.end()..]
        .trim()
        .trim_matches(|c: char| c.is_whitespace() || ",.!?:;-".contains(c));
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LYUBOV: i64 = 319590859;
    const TITOMIR: i64 = 885052741;
    const ORDINARY: i64 = 1001;

    fn store() -> PreferenceStore {
        PreferenceStore::new(default_special_users())
    }

    #[test]
    fn test_name_round_trip_and_reset() {
        let mut prefs = store();

        let reply = prefs.parse_setup_command(ORDINARY, "Меня зовут Алекс").unwrap();
        assert_eq!(reply, "✅ Понял, буду обращаться к тебе: Алекс");
        assert_eq!(prefs.get_preferences(ORDINARY).name.as_deref(), Some("Алекс"));

        let reply = prefs.parse_setup_command(ORDINARY, "сбросить настройки").unwrap();
        assert_eq!(reply, "✅ Настройки сброшены к стандартным.");
        assert_eq!(prefs.get_preferences(ORDINARY).name, None);
        assert!(!prefs.has_preferences(ORDINARY));
    }

    #[test]
    fn test_alternative_name_phrase() {
        let mut prefs = store();
        prefs.parse_setup_command(ORDINARY, "Сота, моё имя Вера!").unwrap();
        assert_eq!(prefs.get_preferences(ORDINARY).name.as_deref(), Some("Вера"));
    }

    #[test]
    fn test_name_command_without_name() {
        let mut prefs = store();
        assert!(prefs.parse_setup_command(ORDINARY, "меня зовут").is_none());
        assert!(!prefs.has_preferences(ORDINARY));
    }

    #[test]
    fn test_style_and_tone_commands() {
        let mut prefs = store();

        assert_eq!(
            prefs.parse_setup_command(ORDINARY, "Говори со мной игриво").as_deref(),
            Some("✅ Буду общаться с тобой игриво.")
        );
        assert_eq!(
            prefs.parse_setup_command(ORDINARY, "будь серьезным, пожалуйста").as_deref(),
            Some("✅ Буду общаться серьёзно.")
        );

        let stored = prefs.get_preferences(ORDINARY);
        assert_eq!(stored.style, Some(Style::Playful));
        assert_eq!(stored.tone, Some(Tone::Serious));
    }

    #[test]
    fn test_first_rule_wins() {
        // "неформально" contains "формально"; the formal rule comes first.
        let mut prefs = store();
        prefs.parse_setup_command(ORDINARY, "говори со мной неформально");
        assert_eq!(prefs.get_preferences(ORDINARY).style, Some(Style::Casual));

        // A name command shadows everything after it.
        let mut prefs = store();
        prefs.parse_setup_command(ORDINARY, "меня зовут Ян, будь загадочным");
        let stored = prefs.get_preferences(ORDINARY);
        assert_eq!(stored.name.as_deref(), Some("Ян, будь загадочным"));
        assert_eq!(stored.tone, None);
    }

    #[test]
    fn test_show_settings() {
        let mut prefs = store();
        let reply = prefs.parse_setup_command(ORDINARY, "Какие у меня настройки?").unwrap();
        assert!(reply.contains("Имя: Не указано"));
        assert!(reply.contains("Стиль: neutral"));
        assert!(reply.contains("Тон: friendly"));
    }

    #[test]
    fn test_unrecognized_text() {
        let mut prefs = store();
        assert!(prefs.parse_setup_command(ORDINARY, "как дела?").is_none());
    }

    #[test]
    fn test_prompt_for_user_without_anything() {
        assert_eq!(store().get_personalized_prompt(ORDINARY, "BASE"), "BASE");
    }

    #[test]
    fn test_prompt_order() {
        let mut prefs = store();
        prefs.set_preference(LYUBOV, PreferenceValue::Name("Люба".to_string()));
        prefs.set_preference(LYUBOV, PreferenceValue::StyleNotes("Говори стихами.".to_string()));
        prefs.set_preference(LYUBOV, PreferenceValue::Style(Style::Formal));
        prefs.set_preference(LYUBOV, PreferenceValue::Tone(Tone::Mysterious));

        let prompt = prefs.get_personalized_prompt(LYUBOV, "BASE");
        let expected = format!(
            "BASE {} Пользователя зовут Люба. Говори стихами. {} {}",
            "К пользователю по имени Любовь будь с ней особенно ласковым и уважительным.",
            Style::Formal.directive(),
            Tone::Mysterious.directive(),
        );
        assert_eq!(prompt, expected);
    }

    #[test]
    fn test_prompt_defaults_style_and_tone() {
        let mut prefs = store();
        prefs.set_preference(ORDINARY, PreferenceValue::Name("Олег".to_string()));
        let prompt = prefs.get_personalized_prompt(ORDINARY, "BASE");
        assert!(prompt.ends_with(&format!(
            "{} {}",
            Style::Neutral.directive(),
            Tone::Friendly.directive()
        )));
    }

    #[test]
    fn test_special_directive_without_stored_record() {
        let prompt = store().get_personalized_prompt(TITOMIR, "BASE");
        assert!(prompt.starts_with("BASE К пользователю по имени Титомир"));
    }

    #[test]
    fn test_honorific_prepended_once() {
        let prefs = store();
        assert_eq!(
            prefs.apply_honorific(LYUBOV, "шестерёнки крутятся."),
            "Моя королева, шестерёнки крутятся."
        );
        assert_eq!(
            prefs.apply_honorific(LYUBOV, "Разумеется, МОЯ КОРОЛЕВА."),
            "Разумеется, МОЯ КОРОЛЕВА."
        );
        assert_eq!(
            prefs.apply_honorific(TITOMIR, "нет."),
            "Неопытный менестрель, нет."
        );
        assert_eq!(prefs.apply_honorific(ORDINARY, "нет."), "нет.");
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_preferences.json");

        let mut prefs = PreferenceStore::load_or_new(path.clone(), default_special_users());
        prefs.parse_setup_command(ORDINARY, "Меня зовут Алекс");
        prefs.parse_setup_command(ORDINARY, "будь загадочным");

        let reloaded = PreferenceStore::load_or_new(path, default_special_users());
        let stored = reloaded.get_preferences(ORDINARY);
        assert_eq!(stored.name.as_deref(), Some("Алекс"));
        assert_eq!(stored.tone, Some(Tone::Mysterious));
    }

    #[test]
    fn test_unknown_style_in_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_preferences.json");
        std::fs::write(&path, r#"{"1001": {"name": "Ира", "style": "baroque", "tone": "serious"}}"#)
            .unwrap();

        let prefs = PreferenceStore::load_or_new(path, vec![]);
        let stored = prefs.get_preferences(ORDINARY);
        assert_eq!(stored.name.as_deref(), Some("Ира"));
        assert_eq!(stored.style, None);
        assert_eq!(stored.tone, Some(Tone::Serious));
    }
}
