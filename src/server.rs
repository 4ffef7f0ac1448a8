//! Webhook HTTP server.
//!
//! `POST /` receives VK Callback API events. The remaining routes are
//! operator endpoints for the confirmation code and subsystem statistics.

use axum::{
    Json, Router as HttpRouter,
    body::Bytes,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::confirmation::ConfirmationStore;
use crate::relay::message::parse_message_new;
use crate::relay::{InboundMessage, Router};

/// Shared state for all handlers.
pub struct AppState {
    pub router: Arc<Router>,
    pub confirmation: Mutex<ConfirmationStore>,
    pub callback_secret: Option<String>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        router: Arc<Router>,
        confirmation: ConfirmationStore,
        callback_secret: Option<String>,
    ) -> Self {
        Self {
            router,
            confirmation: Mutex::new(confirmation),
            callback_secret,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Callback API envelope.
#[derive(Deserialize)]
struct CallbackEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    object: Value,
    secret: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

pub fn build_router(state: Arc<AppState>) -> HttpRouter {
    HttpRouter::new()
        .route("/", post(callback))
        .route("/update_confirmation/{code}", get(update_confirmation))
        .route("/confirmation_status", get(confirmation_status))
        .route("/deduplicator_status", get(deduplicator_status))
        .route("/deduplicator_reset", post(deduplicator_reset))
        .route("/hostile_responses_status", get(hostile_responses_status))
        .route("/random_comments_status", get(random_comments_status))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C or SIGTERM.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<(), String> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {addr}: {e}"))?;

    info!("🌐 Webhook server listening on {addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Server error: {e}"))?;

    info!("Server shut down");
    Ok(())
}

fn ok() -> Response {
    "ok".into_response()
}

async fn callback(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let event: CallbackEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            warn!("Unparseable callback body: {e}");
            return ok();
        }
    };
    info!("Event: {}", event.kind);

    if event.kind == "confirmation" {
        let mut confirmation = state.confirmation.lock().await;
        confirmation.update_code_from_env();
        return match confirmation.code() {
            Some(code) => {
                info!("✅ Answering confirmation with code {code}");
                code.to_string().into_response()
            }
            None => {
                error!("❌ Confirmation code is not configured");
                info!("{}", confirmation.setup_instructions());
                ok()
            }
        };
    }

    if let Some(ref expected) = state.callback_secret
        && event.secret.as_deref() != Some(expected.as_str())
    {
        warn!("Callback secret mismatch, dropping {} event", event.kind);
        return ok();
    }

    if event.kind == "message_new" {
        match parse_message_new(&event.object) {
            Ok(msg) => dispatch(state.router.clone(), msg),
            Err(e) => warn!("{e}"),
        }
    }

    ok()
}

/// Run the router on its own task. A panic in the pipeline is logged and
/// never reaches the webhook response.
fn dispatch(router: Arc<Router>, msg: InboundMessage) {
    let task = tokio::spawn(async move { router.handle(&msg).await });
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!("💥 Message handling task failed: {e}");
        }
    });
}

async fn update_confirmation(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Json<Value> {
    state.confirmation.lock().await.save_code(&code);
    info!("🔄 Confirmation code updated: {code}");
    Json(json!({"status": "updated", "code": code}))
}

async fn confirmation_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let confirmation = state.confirmation.lock().await;
    Json(json!({
        "status": confirmation.status(),
        "instructions": confirmation.setup_instructions(),
    }))
}

async fn deduplicator_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "deduplicator_stats": state.router.dedup_stats().await,
        "description": "Статистика системы предотвращения дублирования сообщений",
    }))
}

async fn deduplicator_reset(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.router.reset_dedup().await;
    info!("🧹 Deduplicator cleared by operator");
    Json(json!({
        "status": "reset",
        "deduplicator_stats": state.router.dedup_stats().await,
    }))
}

async fn hostile_responses_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "hostile_responses_stats": state.router.hostile_stats().await,
        "description": "Статистика системы резких ответов на негативные сообщения",
    }))
}

async fn random_comments_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "random_comments_stats": state.router.ambient_stats().await,
        "description": "Статистика системы случайных комментариев без упоминаний",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ambient::{AmbientCommentator, AmbientConfig};
    use crate::relay::backend::{LlmBackend, Messenger, SearchBackend, SearchHit};
    use crate::relay::dedup::Deduplicator;
    use crate::relay::history::{HistoryEntry, HistoryStore};
    use crate::relay::hostile::HostileResponder;
    use crate::relay::preferences::PreferenceStore;
    use crate::relay::{RouterConfig, RouterStores};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Mutex as StdMutex;
    use tower::ServiceExt;

    const GROUP: i64 = 229_000_000;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: StdMutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send(&self, peer_id: i64, text: &str) -> bool {
            self.sent.lock().unwrap().push((peer_id, text.to_string()));
            true
        }

        async fn get_display_name(&self, _user_id: i64) -> String {
            "Алекс".to_string()
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl LlmBackend for EchoLlm {
        async fn complete(&self, message: &str, _: &str, _: &str, _: &[HistoryEntry]) -> String {
            format!("echo: {message}")
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchBackend for NoSearch {
        async fn search(&self, _query: &str) -> Option<Vec<SearchHit>> {
            None
        }
    }

    fn app_with(
        code: Option<&str>,
        secret: Option<&str>,
    ) -> (HttpRouter, Arc<RecordingMessenger>) {
        let messenger = Arc::new(RecordingMessenger::default());
        let stores = RouterStores {
            dedup: Deduplicator::new(300, 60, true),
            hostile: HostileResponder::new(300),
            ambient: AmbientCommentator::with_seed(
                AmbientConfig { base_probability: 0.0, topic_probability: 0.0, ..Default::default() },
                1,
            ),
            preferences: PreferenceStore::new(vec![]),
            history: HistoryStore::new(20),
        };
        let router = Router::new(
            RouterConfig::new(GROUP, "PROMPT".to_string()),
            stores,
            messenger.clone(),
            Arc::new(EchoLlm),
            Arc::new(NoSearch),
        );
        let state = AppState::new(
            Arc::new(router),
            ConfirmationStore::new(code.map(str::to_string)),
            secret.map(str::to_string),
        );
        (build_router(Arc::new(state)), messenger)
    }

    async fn post_json(app: HttpRouter, body: Value) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn get_json(app: HttpRouter, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn message_event(text: &str) -> Value {
        json!({
            "type": "message_new",
            "object": {"message": {
                "id": 0,
                "date": chrono::Utc::now().timestamp(),
                "peer_id": 2_000_000_001i64,
                "from_id": 42,
                "text": text
            }},
            "group_id": GROUP
        })
    }

    #[tokio::test]
    async fn test_confirmation_returns_code() {
        let (app, _) = app_with(Some("9a624bd2"), None);
        let (status, body) = post_json(app, json!({"type": "confirmation", "group_id": GROUP})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "9a624bd2");
    }

    #[tokio::test]
    async fn test_garbage_body_is_acknowledged() {
        let (app, _) = app_with(None, None);
        let response = app
            .oneshot(Request::builder().method("POST").uri("/").body(Body::from("{{{")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_message_new_is_routed() {
        let (app, messenger) = app_with(None, None);
        let (_, body) = post_json(app, message_event("Сота, привет")).await;
        assert_eq!(body, "ok");

        for _ in 0..50 {
            if !messenger.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (2_000_000_001, "echo: Сота, привет".to_string()));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_dropped() {
        let (app, messenger) = app_with(None, Some("s3cret"));
        let mut event = message_event("Сота, привет");
        event["secret"] = json!("wrong");

        let (_, body) = post_json(app, event).await;
        assert_eq!(body, "ok");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_query_confirmation() {
        let (app, _) = app_with(None, None);
        let json = get_json(app.clone(), "/update_confirmation/abc123").await;
        assert_eq!(json["status"], "updated");
        assert_eq!(json["code"], "abc123");

        let json = get_json(app, "/confirmation_status").await;
        assert_eq!(json["status"]["has_code"], true);
        assert_eq!(json["status"]["code"], "abc123");
        assert_eq!(json["status"]["attempt_count"], 1);
        assert!(json["instructions"].is_string());
    }

    #[tokio::test]
    async fn test_stats_endpoints() {
        let (app, _) = app_with(None, None);

        let json = get_json(app.clone(), "/deduplicator_status").await;
        assert_eq!(json["deduplicator_stats"]["max_age_seconds"], 300);

        let json = get_json(app.clone(), "/hostile_responses_status").await;
        assert_eq!(json["hostile_responses_stats"]["can_respond"], true);

        let json = get_json(app.clone(), "/random_comments_status").await;
        assert_eq!(json["random_comments_stats"]["comments_made"], 0);

        let json = get_json(app, "/health").await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_deduplicator_reset_clears_seen_messages() {
        let (app, messenger) = app_with(None, None);
        post_json(app.clone(), message_event("Сота, привет")).await;
        for _ in 0..50 {
            if !messenger.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let json = get_json(app.clone(), "/deduplicator_status").await;
        assert_eq!(json["deduplicator_stats"]["active_content_hashes"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/deduplicator_reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "reset");
        assert_eq!(json["deduplicator_stats"]["total_active"], 0);

        // The same message is handled again after the reset.
        post_json(app, message_event("Сота, привет")).await;
        for _ in 0..50 {
            if messenger.sent.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(messenger.sent.lock().unwrap().len(), 2);
    }
}
