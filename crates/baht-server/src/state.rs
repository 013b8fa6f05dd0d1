// Shared state handed to every request handler.

use std::sync::Arc;

use anyhow::Context;
use baht_app::{store_from_config, FileStore, Notifier};
use baht_core::config::Config;
use baht_core::db::Database;
use baht_core::model::User;
use baht_llm::{LlmClient, RetryPolicy};
use chrono::Utc;
use tracing::{info, warn};

pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub llm: LlmClient,
    pub notifier: Notifier,
    pub store: Arc<dyn FileStore>,
    pub retry: RetryPolicy,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Build every client from `config` around an already opened database.
    pub fn from_config(config: Config, db: Database) -> anyhow::Result<Self> {
        let llm = LlmClient::from_config(&config);
        match &llm {
            LlmClient::Active(_) => info!(model = %config.ai.model, "receipt reading enabled"),
            LlmClient::Disabled => info!("receipt reading disabled (no Gemini API key)"),
        }
        let notifier = Notifier::from_config(&config);
        if !notifier.is_enabled() {
            info!("LINE notifications disabled (no channel access token)");
        }
        let store = store_from_config(&config).context("failed to set up receipt storage")?;
        info!(backend = store.backend(), "receipt storage ready");
        let retry = RetryPolicy::from_config(&config.ai);

        let state = Self {
            db,
            config,
            llm,
            notifier,
            store,
            retry,
        };
        state.seed_api_users()?;
        Ok(state)
    }

    /// Make sure every configured API key resolves to a stored user.
    pub fn seed_api_users(&self) -> anyhow::Result<()> {
        let keys = &self.config.credentials.api_keys;
        if keys.is_empty() {
            warn!("no API keys configured; every /api request will be rejected");
        }
        for entry in keys {
            if self.db.get_user(&entry.user_id)?.is_some() {
                continue;
            }
            let user = User {
                id: entry.user_id.clone(),
                name: entry.name.clone(),
                email: format!("{}@api-key.local", entry.user_id),
                line_user_id: None,
                created_at: Utc::now(),
            };
            self.db
                .create_user(&user)
                .with_context(|| format!("failed to create user for API key {}", entry.name))?;
            info!(user_id = %user.id, name = %user.name, "created user for API key");
        }
        Ok(())
    }
}
