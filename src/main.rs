use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use sotha::config::Config;
use sotha::confirmation::ConfirmationStore;
use sotha::relay::ambient::AmbientCommentator;
use sotha::relay::dedup::Deduplicator;
use sotha::relay::gigachat::GigaChatClient;
use sotha::relay::history::HistoryStore;
use sotha::relay::hostile::HostileResponder;
use sotha::relay::preferences::PreferenceStore;
use sotha::relay::search::SerperClient;
use sotha::relay::vk::VkClient;
use sotha::relay::{Router, RouterStores};
use sotha::server::{self, AppState};
use sotha::vk_log::VkLogLayer;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sotha.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let vk = VkClient::new(
        config.vk_token.clone(),
        config.vk_api_url.clone(),
        config.vk_api_version.clone(),
        config.vk_group_id,
        config.dry_run,
    );

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::never(&log_dir, "sotha.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_peer_id) = config.log_peer_id {
        registry.with(VkLogLayer::new(vk.clone(), log_peer_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting Сота Сил...");
    info!("Loaded config from {config_path}");
    if config.dry_run {
        info!("DRY RUN mode enabled");
    }

    info!("📡 Checking VK connection...");
    match vk.check_group().await {
        Ok(name) => info!("✅ Connected to VK community '{name}'"),
        Err(e) => {
            error!("❌ VK connection failed: {e}");
            return ExitCode::FAILURE;
        }
    }

    let gigachat = match GigaChatClient::new(config.gigachat.clone()) {
        Ok(c) => c,
        Err(e) => {
            error!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("🤖 Checking GigaChat connection...");
    if let Err(e) = gigachat.test_connection().await {
        error!("❌ GigaChat connection failed: {e}");
        return ExitCode::FAILURE;
    }
    info!("✅ GigaChat connection OK");

    let search = SerperClient::new(config.serper_api_key.clone());
    if !search.is_configured() {
        warn!("Serper API key not set, search requests will fail politely");
    }

    let stores = RouterStores {
        dedup: Deduplicator::new(
            config.dedup_retention_secs,
            config.dedup_sweep_secs,
            config.dedup_expire_content_hashes,
        ),
        hostile: HostileResponder::load_or_new(
            config.hostile_state_path(),
            config.hostile_cooldown_secs,
        ),
        ambient: AmbientCommentator::new(config.ambient.clone()),
        preferences: PreferenceStore::load_or_new(
            config.preferences_path(),
            config.special_users.clone(),
        ),
        history: HistoryStore::load_or_new(config.history_path(), config.history_limit),
    };

    let router = Router::new(
        config.router_config(),
        stores,
        Arc::new(vk),
        Arc::new(gigachat),
        Arc::new(search),
    );

    let confirmation =
        ConfirmationStore::load_or_new(config.confirmation_path(), config.confirmation_code.clone());
    if confirmation.code().is_none() {
        warn!("Confirmation code not set yet");
        info!("{}", confirmation.setup_instructions());
    }

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.port);

    let state = Arc::new(AppState::new(
        Arc::new(router),
        confirmation,
        config.callback_secret.clone(),
    ));

    info!("📝 Point the VK Callback API at http://<host>:{port}/");
    if let Err(e) = server::serve(state, port).await {
        error!("❌ {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
