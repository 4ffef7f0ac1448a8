//! Search intent detection and the Serper web search backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::relay::backend::{SearchBackend, SearchHit};

const SERPER_URL: &str = "https://google.serper.dev/search";
const RESULTS_PER_QUERY: u32 = 3;

pub const SEARCH_PREFIX: &str = "Магия псиджиков нашла ответ на твой вопрос:";
pub const SEARCH_FAILED: &str =
    "Магия псиджиков не смогла найти ничего... Возможно, механизмы поиска временно недоступны.";

/// Substrings that mark a message as an informational question.
const SEARCH_KEYWORDS: &[&str] = &[
    "найди", "найди в сети", "разузнай", "узнай", "проверь",
    "найди информацию", "поищи", "гугл", "google", "поиск",
    "что такое", "кто такой", "кто такая", "как работает",
    "какая", "какой", "какое", "какие", "сколько", "где находится",
    "история", "сведения", "информация о", "опиши", "расскажи о",
];

/// Leading phrases stripped from the query. Question words like "какой" stay,
/// they carry meaning for the search engine.
const QUERY_PREFIXES: &[&str] = &[
    "найди", "найди в сети", "разузнай", "узнай", "проверь",
    "найди информацию", "поищи", "гугл", "google", "поиск",
    "что такое", "кто такой", "кто такая", "как работает",
    "история", "сведения", "информация о", "опиши", "расскажи о",
];

const SEPARATORS: &[char] = &[':', ' ', ',', '.', '!', '?', '-'];

pub fn is_search_request(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    match SEARCH_KEYWORDS.iter().find(|k| lower.contains(*k)) {
        Some(keyword) => {
            info!("🔍 Search keyword: {keyword}");
            true
        }
        None => false,
    }
}

/// Strip one leading bot alias and then one leading search phrase, longest
/// match first. Falls back to the original text when nothing is left.
pub fn extract_search_query(text: &str, aliases: &[String]) -> String {
    let mut query = text.trim().to_lowercase();

    let mut names: Vec<String> = aliases
        .iter()
        .map(|a| a.trim_start_matches('@').to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    names.sort_by_key(|a| std::cmp::Reverse(a.chars().count()));
    query = strip_longest_prefix(&query, names.iter().map(String::as_str));

    let mut prefixes: Vec<&str> = QUERY_PREFIXES.to_vec();
    prefixes.sort_by_key(|p| std::cmp::Reverse(p.chars().count()));
    query = strip_longest_prefix(&query, prefixes.into_iter());

    if query.is_empty() {
        text.to_string()
    } else {
        query
    }
}

/// `candidates` must already be sorted longest first.
fn strip_longest_prefix<'a>(query: &str, mut candidates: impl Iterator<Item = &'a str>) -> String {
    match candidates.find(|c| query.starts_with(c)) {
        Some(prefix) => query[prefix.len()..]
            .trim()
            .trim_start_matches(SEPARATORS)
            .to_string(),
        None => query.to_string(),
    }
}

/// Reply text for a finished search: the top hit's snippet and link, or a
/// fixed failure line.
pub fn format_reply(results: Option<&[SearchHit]>) -> String {
    match results.and_then(|hits| hits.first()) {
        Some(hit) => {
            let snippet = if hit.snippet.is_empty() {
                "Нет описания"
            } else {
                hit.snippet.as_str()
            };
            format!("{SEARCH_PREFIX}\n\n{snippet}\n{}", hit.link)
                .trim_end()
                .to_string()
        }
        None => SEARCH_FAILED.to_string(),
    }
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

pub struct SerperClient {
    api_key: String,
    url: String,
    http: reqwest::Client,
}

impl SerperClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            url: SERPER_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[async_trait]
impl SearchBackend for SerperClient {
    async fn search(&self, query: &str) -> Option<Vec<SearchHit>> {
        if !self.is_configured() {
            warn!("Serper API key not configured, search disabled");
            return None;
        }

        let response = match self
            .http
            .post(&self.url)
            .header("X-API-KEY", &self.api_key)
            .json(&SerperRequest { q: query, num: RESULTS_PER_QUERY })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("❌ Serper request failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("❌ Serper API error: {status}, {body}");
            return None;
        }

        match response.json::<SerperResponse>().await {
            Ok(parsed) => {
                info!("✅ Search done: {query} ({} results)", parsed.organic.len());
                Some(parsed.organic)
            }
            Err(e) => {
                error!("❌ Failed to parse Serper response: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> Vec<String> {
        ["сота", "сота сил", "сота-сил", "@sota", "альмсиви"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_search_detection() {
        assert!(is_search_request("Сота, что такое двемеры?"));
        assert!(is_search_request("найди погоду в Москве"));
        assert!(is_search_request("Сколько лет Вивеку"));
        assert!(!is_search_request("Сота, привет!"));
        assert!(!is_search_request("Меня зовут Алекс"));
    }

    #[test]
    fn test_query_strips_alias_then_prefix() {
        assert_eq!(extract_search_query("Сота, что такое двемеры?", &aliases()), "двемеры?");
        assert_eq!(extract_search_query("Сота Сил: найди в сети рецепт", &aliases()), "рецепт");
    }

    #[test]
    fn test_query_longest_alias_wins() {
        // "сота" would leave "-сил найди ..." behind.
        assert_eq!(extract_search_query("Сота-сил найди кофе", &aliases()), "кофе");
    }

    #[test]
    fn test_query_at_alias() {
        assert_eq!(extract_search_query("sota, поищи рецепт", &aliases()), "рецепт");
    }

    #[test]
    fn test_question_words_kept() {
        assert_eq!(
            extract_search_query("сота какая погода", &aliases()),
            "какая погода"
        );
    }

    #[test]
    fn test_empty_query_falls_back_to_text() {
        assert_eq!(extract_search_query("Сота, найди", &aliases()), "Сота, найди");
    }

    #[test]
    fn test_format_top_hit() {
        let hits = vec![
            SearchHit {
                title: "Двемеры".to_string(),
                snippet: "Древняя раса".to_string(),
                link: "https://example.org/dwemer".to_string(),
            },
            SearchHit {
                title: "Другое".to_string(),
                snippet: "Не то".to_string(),
                link: "https://example.org/other".to_string(),
            },
        ];
        assert_eq!(
            format_reply(Some(&hits)),
            "Магия псиджиков нашла ответ на твой вопрос:\n\nДревняя раса\nhttps://example.org/dwemer"
        );
    }

    #[test]
    fn test_format_failure() {
        assert_eq!(format_reply(None), SEARCH_FAILED);
        assert_eq!(format_reply(Some(&[])), SEARCH_FAILED);
    }

    #[tokio::test]
    async fn test_unconfigured_client_returns_none() {
        let client = SerperClient::new(String::new());
        assert!(client.search("anything").await.is_none());
    }
}
