//! VK API client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::relay::backend::Messenger;
use crate::relay::message::preview;

pub const DEFAULT_API_URL: &str = "https://api.vk.com/method/";
pub const DEFAULT_API_VERSION: &str = "5.199";

/// Name used when a user lookup fails.
pub const FALLBACK_NAME: &str = "Друг";

#[derive(Deserialize)]
struct ApiEnvelope {
    response: Option<Value>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Clone)]
pub struct VkClient {
    token: String,
    api_url: String,
    version: String,
    group_id: i64,
    dry_run: bool,
    http: reqwest::Client,
}

impl VkClient {
    pub fn new(token: String, api_url: String, version: String, group_id: i64, dry_run: bool) -> Self {
        let api_url = if api_url.ends_with('/') {
            api_url
        } else {
            format!("{api_url}/")
        };
        Self {
            token,
            api_url,
            version,
            group_id,
            dry_run,
            http: reqwest::Client::new(),
        }
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    /// Call an API method and return its `response` value.
    async fn call(&self, method: &str, params: &[(&str, String)], post: bool) -> Result<Value, String> {
        let url = format!("{}{}", self.api_url, method);
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("access_token", self.token.clone()));
        query.push(("v", self.version.clone()));

        let request = if post {
            self.http.post(&url).form(&query)
        } else {
            self.http.get(&url).query(&query)
        };

        let envelope: ApiEnvelope = request
            .send()
            .await
            .map_err(|e| format!("{method}: HTTP error: {e}"))?
            .json()
            .await
            .map_err(|e| format!("{method}: failed to parse response: {e}"))?;

        if let Some(err) = envelope.error {
            return Err(format!("{method}: VK error {}: {}", err.error_code, err.error_msg));
        }
        envelope.response.ok_or_else(|| format!("{method}: empty response"))
    }

    /// `messages.send` without any tracing output. Used by the log forwarder,
    /// which must not feed its own sends back into the log.
    pub async fn send_raw(&self, peer_id: i64, text: &str) -> Result<(), String> {
        if self.dry_run {
            return Ok(());
        }
        let params = [
            ("peer_id", peer_id.to_string()),
            ("message", text.to_string()),
            ("random_id", rand::random::<i32>().to_string()),
        ];
        self.call("messages.send", &params, true).await.map(|_| ())
    }

    /// Group name from `groups.getById`. Used as the startup connectivity check.
    pub async fn check_group(&self) -> Result<String, String> {
        let response = self
            .call("groups.getById", &[("group_ids", self.group_id.to_string())], false)
            .await?;

        // 5.199 wraps the list in `groups`; older versions return it bare.
        let groups = response.get("groups").unwrap_or(&response);
        groups
            .get(0)
            .and_then(|g| g.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "groups.getById: group not found".to_string())
    }
}

#[async_trait]
impl Messenger for VkClient {
    async fn send(&self, peer_id: i64, text: &str) -> bool {
        if self.dry_run {
            info!("📤 [dry run] to {peer_id}: {}", preview(text, 100));
            return true;
        }

        match self.send_raw(peer_id, text).await {
            Ok(()) => {
                info!("📤 Sent to {peer_id}: {}", preview(text, 50));
                true
            }
            Err(e) => {
                warn!("Failed to send to {peer_id}: {e}");
                false
            }
        }
    }

    async fn get_display_name(&self, user_id: i64) -> String {
        let params = [
            ("user_ids", user_id.to_string()),
            ("fields", "first_name".to_string()),
        ];
        match self.call("users.get", &params, false).await {
            Ok(response) => response
                .get(0)
                .and_then(|u| u.get("first_name"))
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .unwrap_or(FALLBACK_NAME)
                .to_string(),
            Err(e) => {
                warn!("User lookup failed for {user_id}: {e}");
                FALLBACK_NAME.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_gets_trailing_slash() {
        let client = VkClient::new(
            "t".to_string(),
            "https://api.vk.com/method".to_string(),
            DEFAULT_API_VERSION.to_string(),
            1,
            true,
        );
        assert_eq!(client.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_error_envelope_parses() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"error": {"error_code": 5, "error_msg": "User authorization failed"}}"#,
        )
        .unwrap();
        assert!(envelope.response.is_none());
        assert_eq!(envelope.error.unwrap().error_code, 5);
    }

    #[tokio::test]
    async fn test_dry_run_send_succeeds_without_network() {
        let client = VkClient::new(
            "t".to_string(),
            "http://127.0.0.1:9/".to_string(),
            DEFAULT_API_VERSION.to_string(),
            1,
            true,
        );
        assert!(client.send(2_000_000_001, "привет").await);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back() {
        let client = VkClient::new(
            "t".to_string(),
            "http://127.0.0.1:9/".to_string(),
            DEFAULT_API_VERSION.to_string(),
            1,
            false,
        );
        assert_eq!(client.get_display_name(42).await, FALLBACK_NAME);
    }
}
