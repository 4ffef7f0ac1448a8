//! GigaChat completions client.
//!
//! Access tokens come from the Sber OAuth endpoint and are cached until the
//! API answers 401, at which point one refresh and one retry are attempted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::relay::backend::LlmBackend;
use crate::relay::history::{HistoryEntry, Role};
use crate::relay::message::preview;

pub const DEFAULT_AUTH_URL: &str = "https://ngw.devices.sberbank.ru:9443/api/v2/oauth";
pub const DEFAULT_API_URL: &str = "https://gigachat.devices.sberbank.ru/api/v1";

const NO_TOKEN_REPLY: &str = "Мои механизмы сейчас не отвечают... Попробуй позже.";
const API_ERROR_REPLY: &str = "Механизмы пока молчат... Попробуй позже.";
const BROKEN_REPLY: &str = "Что-то сломалось в моих механизмах... Попробуй позже.";

#[derive(Debug, Clone)]
pub struct GigaChatConfig {
    pub auth_key: String,
    pub scope: String,
    pub model: String,
    pub auth_url: String,
    pub api_url: String,
    pub accept_invalid_certs: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Auth(String),
    Api { status: u16, body: String },
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Auth(e) => write!(f, "Auth error: {e}"),
            Error::Api { status, body } => write!(f, "API error {status}: {body}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub struct GigaChatClient {
    config: GigaChatConfig,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl GigaChatClient {
    pub fn new(config: GigaChatConfig) -> Result<Self, String> {
        // Sber endpoints are signed by the Russian national CA, which is
        // missing from most trust stores.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    async fn fetch_token(&self) -> Result<String, Error> {
        let response = self
            .http
            .post(&self.config.auth_url)
            .header("Accept", "application/json")
            .header("RqUID", uuid::Uuid::new_v4().to_string())
            .header("Authorization", format!("Basic {}", self.config.auth_key))
            .form(&[("scope", self.config.scope.as_str())])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("{status}: {body}")));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("no access_token in response".to_string()))
    }

    /// Cached token, fetching a new one when none is held. The lock is not
    /// held during the fetch; concurrent fetches each store their token and
    /// the last one stays cached.
    async fn token(&self) -> Result<String, Error> {
        if let Some(token) = self.token.lock().await.clone() {
            return Ok(token);
        }
        let token = self.fetch_token().await?;
        info!("🔑 GigaChat access token obtained");
        *self.token.lock().await = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token if it is still the one the API rejected.
    async fn invalidate_token(&self, rejected: &str) {
        let mut guard = self.token.lock().await;
        if guard.as_deref() == Some(rejected) {
            *guard = None;
        }
    }

    async fn request_completion(
        &self,
        token: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<String, Error> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.api_url))
            .header("Accept", "application/json")
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(Error::Empty)
    }

    /// Verify credentials and reachability with `GET /models`.
    pub async fn test_connection(&self) -> Result<(), Error> {
        let token = self.token().await?;
        let response = self
            .http
            .get(format!("{}/models", self.config.api_url))
            .header("Accept", "application/json")
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(Error::Api { status, body })
        }
    }
}

/// System prompt, then prior user/assistant turns, then the new message.
fn build_messages<'a>(
    system_prompt: &'a str,
    history: &'a [HistoryEntry],
    message: &'a str,
) -> Vec<ApiMessage<'a>> {
    let mut messages = vec![ApiMessage { role: "system", content: system_prompt }];
    messages.extend(
        history
            .iter()
            .filter(|e| e.role != Role::System)
            .map(|e| ApiMessage { role: e.role.as_str(), content: &e.content }),
    );
    messages.push(ApiMessage { role: "user", content: message });
    messages
}

#[async_trait]
impl LlmBackend for GigaChatClient {
    async fn complete(
        &self,
        message: &str,
        conversation_id: &str,
        system_prompt: &str,
        history: &[HistoryEntry],
    ) -> String {
        let request = CompletionRequest {
            model: &self.config.model,
            messages: build_messages(system_prompt, history, message),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let token = match self.token().await {
            Ok(t) => t,
            Err(e) => {
                error!("❌ GigaChat auth failed: {e}");
                return NO_TOKEN_REPLY.to_string();
            }
        };

        let mut result = self.request_completion(&token, &request).await;

        if let Err(Error::Api { status: 401, .. }) = result {
            warn!("GigaChat token rejected, refreshing");
            self.invalidate_token(&token).await;
            result = match self.token().await {
                Ok(fresh) => self.request_completion(&fresh, &request).await,
                Err(e) => Err(e),
            };
        }

        match result {
            Ok(reply) => {
                info!("🤖 GigaChat reply for {conversation_id}: {}", preview(&reply, 100));
                reply
            }
            Err(e @ (Error::Api { .. } | Error::Auth(_))) => {
                error!("❌ GigaChat API error: {e}");
                API_ERROR_REPLY.to_string()
            }
            Err(e) => {
                error!("❌ GigaChat request failed: {e}");
                BROKEN_REPLY.to_string()
            }
        }
    }
}
