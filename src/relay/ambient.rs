//! Unprompted remarks on conversations that don't address the bot.
//!
//! A remark needs three things: a long-enough message, an elapsed cooldown,
//! and a successful dice roll. Messages that touch one of the persona's
//! topics roll with a much higher probability and get a topical remark.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// Tunables for the ambient engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientConfig {
    /// Chance of a remark on an ordinary message.
    pub base_probability: f64,
    /// Chance of a remark when the message touches a known topic.
    pub topic_probability: f64,
    pub cooldown_secs: i64,
    /// Messages shorter than this (in characters) are never commented on.
    pub min_length: usize,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            base_probability: 0.03,
            topic_probability: 0.25,
            cooldown_secs: 600,
            min_length: 12,
        }
    }
}

struct Topic {
    name: &'static str,
    /// Regexes over the lowercased text, anchored at a word start.
    keywords: &'static [&'static str],
    remarks: &'static [&'static str],
}

const TOPICS: &[Topic] = &[
    Topic {
        name: "mechanisms",
        keywords: &[
            r"\bмеханизм",
            r"\bшестер",
            r"\bдвемер",
            r"\bробот",
            r"\bчас(ы|ов|ам|ами|ах)\b",
            r"\bмашин",
            r"\bинженер",
        ],
        remarks: &[
            "Механизмы... Как приятно слышать, что хоть кто-то здесь думает о шестернях.",
            "Двемеры бы оценили этот разговор. Жаль, что их больше нет.",
            "Любой механизм совершенен, пока его не касается рука смертного.",
        ],
    },
    Topic {
        name: "tribunal",
        keywords: &[
            r"\bвивек",
            r"\bальмалекси",
            r"\bтрибунал",
            r"\bбог(а|у|ом|е|и|ов|ам|ами|ах|иня|ини|иней)?\b",
            r"\bбожеств",
        ],
        remarks: &[
            "Вивек опять бы написал об этом тридцать шесть уроков. Я предпочитаю чертежи.",
            "Божественность переоценена. Вечность лучше тратить на работу.",
            "Трибунал помнит многое. Я помню всё.",
        ],
    },
    Topic {
        name: "magic",
        keywords: &[
            r"\bмаги(я|и|ю|ей)\b",
            r"\bмагическ",
            r"\bзаклинани",
            r"\bмаг(а|у|ом|е|и|ов|ам|ами|ах)?\b",
            r"\bволшеб",
            r"\bчар(ы|ам|ами|ах)\b",
            r"\bчародей",
        ],
        remarks: &[
            "Магия без понимания её устройства лишь фокусы для толпы.",
            "Любое заклинание можно разобрать на составные части. Как и любого мага.",
            "Псиджики бы сейчас многозначительно промолчали.",
        ],
    },
    Topic {
        name: "morrowind",
        keywords: &[
            r"\bморровинд",
            r"\bвварденфелл",
            r"\bкрасн(ая|ой|ую)\s+гор",
            r"\bданмер",
            r"\bтамриэл",
        ],
        remarks: &[
            "Вварденфелл... Пепел, грибы и упрямые данмеры. Родные края.",
            "Красная Гора всё ещё помнит своё сердце.",
            "Тамриэль велик, но его устройство поддаётся изучению.",
        ],
    },
];

const GENERIC_REMARKS: &[&str] = &[
    "Любопытно. Продолжайте, я записываю.",
    "В Заводном городе такие разговоры считались бы философией.",
    "Интересная мысль. Не лишена изъянов, но интересная.",
    "Я слушаю. Я всегда слушаю.",
    "Смертные так увлекательно рассуждают о простых вещах.",
    "Эта беседа нуждается в капле механической точности.",
];

#[derive(Debug, Clone, Serialize)]
pub struct AmbientStats {
    pub comments_made: u64,
    pub last_comment_time: Option<String>,
    pub seconds_since_last: Option<i64>,
    pub can_comment: bool,
    pub cooldown_secs: i64,
    pub base_probability: f64,
    pub topic_probability: f64,
}

pub struct AmbientCommentator {
    config: AmbientConfig,
    rng: StdRng,
    comments_made: u64,
    last_comment: Option<DateTime<Utc>>,
}

impl AmbientCommentator {
    pub fn new(config: AmbientConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic engine for tests.
    pub fn with_seed(config: AmbientConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: AmbientConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            comments_made: 0,
            last_comment: None,
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_comment
            .is_some_and(|last| now - last < Duration::seconds(self.config.cooldown_secs))
    }

    pub fn should_comment(&mut self, text: &str) -> bool {
        self.should_comment_at(Utc::now(), text)
    }

    pub fn should_comment_at(&mut self, now: DateTime<Utc>, text: &str) -> bool {
        if text.trim().chars().count() < self.config.min_length || self.in_cooldown(now) {
            return false;
        }

        let topic = match_topic(text);
        let probability = if topic.is_some() {
            self.config.topic_probability
        } else {
            self.config.base_probability
        };

        let roll = self.rng.random_bool(probability.clamp(0.0, 1.0));
        debug!("Ambient roll (topic: {:?}, p={}): {}", topic.map(|t| t.name), probability, roll);
        roll
    }

    pub fn generate_comment(&mut self, text: &str) -> Option<String> {
        self.generate_comment_at(Utc::now(), text)
    }

    /// Produce a remark and start the cooldown. `None` while cooling down.
    pub fn generate_comment_at(&mut self, now: DateTime<Utc>, text: &str) -> Option<String> {
        if self.in_cooldown(now) {
            return None;
        }

        let pool = match_topic(text).map(|t| t.remarks).unwrap_or(GENERIC_REMARKS);
        let remark = pool.choose(&mut self.rng)?.to_string();

        self.last_comment = Some(now);
        self.comments_made += 1;
        Some(remark)
    }

    pub fn stats(&self) -> AmbientStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> AmbientStats {
        AmbientStats {
            comments_made: self.comments_made,
            last_comment_time: self.last_comment.map(|t| t.to_rfc3339()),
            seconds_since_last: self.last_comment.map(|t| (now - t).num_seconds()),
            can_comment: !self.in_cooldown(now),
            cooldown_secs: self.config.cooldown_secs,
            base_probability: self.config.base_probability,
            topic_probability: self.config.topic_probability,
        }
    }
}

/// Compiled keywords, one list per entry of `TOPICS`.
static TOPIC_REGEXES: LazyLock<Vec<Vec<Regex>>> = LazyLock::new(|| {
    TOPICS
        .iter()
        .map(|topic| topic.keywords.iter().filter_map(|k| Regex::new(k).ok()).collect())
        .collect()
});

fn match_topic(text: &str) -> Option<&'static Topic> {
    let lower = text.to_lowercase();
    TOPICS
        .iter()
        .zip(TOPIC_REGEXES.iter())
        .find(|(_, regexes)| regexes.iter().any(|re| re.is_match(&lower)))
        .map(|(topic, _)| topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn always() -> AmbientConfig {
        AmbientConfig {
            base_probability: 1.0,
            topic_probability: 1.0,
            cooldown_secs: 600,
            min_length: 12,
        }
    }

    fn never() -> AmbientConfig {
        AmbientConfig {
            base_probability: 0.0,
            topic_probability: 0.0,
            ..always()
        }
    }

    #[test]
    fn test_short_messages_ignored() {
        let mut engine = AmbientCommentator::with_seed(always(), 1);
        assert!(!engine.should_comment_at(start(), "ага"));
        assert!(engine.should_comment_at(start(), "Кто-нибудь видел новый фильм?"));
    }

    #[test]
    fn test_zero_probability_never_comments() {
        let mut engine = AmbientCommentator::with_seed(never(), 1);
        for _ in 0..100 {
            assert!(!engine.should_comment_at(start(), "Обсуждаем двемерские механизмы"));
        }
    }

    #[test]
    fn test_topic_probability_applies_to_topics_only() {
        let config = AmbientConfig {
            base_probability: 0.0,
            topic_probability: 1.0,
            ..always()
        };
        let mut engine = AmbientCommentator::with_seed(config, 7);
        assert!(engine.should_comment_at(start(), "Обсуждаем двемерские механизмы"));
        assert!(!engine.should_comment_at(start(), "Кто-нибудь видел новый фильм?"));
    }

    #[test]
    fn test_all_keywords_compile() {
        for (topic, regexes) in TOPICS.iter().zip(TOPIC_REGEXES.iter()) {
            assert_eq!(regexes.len(), topic.keywords.len(), "topic {}", topic.name);
        }
    }

    #[test]
    fn test_keywords_match_word_starts_only() {
        let name = |text: &str| match_topic(text).map(|t| t.name);

        assert_eq!(name("Он стал богатый и важный"), None);
        assert_eq!(name("Смотри, какой чарт у этой песни"), None);
        assert_eq!(name("Я часто об этом думаю"), None);
        assert_eq!(name("Мы с ним давно знакомы"), None);

        assert_eq!(name("Кто из богов самый древний?"), Some("tribunal"));
        assert_eq!(name("Бог-поэт опять пишет"), Some("tribunal"));
        assert_eq!(name("Наложил чары на меч"), Some("magic"));
        assert_eq!(name("Этот маг явно новичок"), Some("magic"));
        assert_eq!(name("Мои часы опять спешат"), Some("mechanisms"));
        assert_eq!(name("Поднялись на Красную гору"), Some("morrowind"));
    }

    #[test]
    fn test_topical_remark() {
        let mut engine = AmbientCommentator::with_seed(always(), 3);
        let remark = engine.generate_comment_at(start(), "Вчера читал про Вивека и Трибунал").unwrap();
        let tribunal = TOPICS.iter().find(|t| t.name == "tribunal").unwrap();
        assert!(tribunal.remarks.contains(&remark.as_str()));
    }

    #[test]
    fn test_generic_remark() {
        let mut engine = AmbientCommentator::with_seed(always(), 3);
        let remark = engine.generate_comment_at(start(), "Кто-нибудь видел новый фильм?").unwrap();
        assert!(GENERIC_REMARKS.contains(&remark.as_str()));
    }

    #[test]
    fn test_cooldown_blocks_both_decision_and_generation() {
        let mut engine = AmbientCommentator::with_seed(always(), 5);
        let now = start();
        let text = "Кто-нибудь видел новый фильм?";

        assert!(engine.generate_comment_at(now, text).is_some());
        assert!(!engine.should_comment_at(now + Duration::seconds(10), text));
        assert!(engine.generate_comment_at(now + Duration::seconds(10), text).is_none());

        let later = now + Duration::seconds(600);
        assert!(engine.should_comment_at(later, text));
        assert!(engine.generate_comment_at(later, text).is_some());
    }

    #[test]
    fn test_stats() {
        let mut engine = AmbientCommentator::with_seed(always(), 5);
        let now = start();

        let fresh = engine.stats_at(now);
        assert_eq!(fresh.comments_made, 0);
        assert!(fresh.seconds_since_last.is_none());
        assert!(fresh.can_comment);

        engine.generate_comment_at(now, "Кто-нибудь видел новый фильм?");
        let stats = engine.stats_at(now + Duration::seconds(42));
        assert_eq!(stats.comments_made, 1);
        assert_eq!(stats.seconds_since_last, Some(42));
        assert!(!stats.can_comment);
    }
}
