// Bookkeeping server entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (stdout, filter from RUST_LOG or config)
// 3. Open database
// 4. Build AI, LINE and storage clients; seed API-key users
// 5. Bind the listener and serve until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use baht_core::config;
use baht_core::db::Database;
use baht_server::{build_router, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.log_filter)?;
    info!("Bookkeeping server starting up");
    info!(
        "Config loaded: {} API keys, base currency {}, storage {:?}",
        config.credentials.api_keys.len(),
        config.currency.base,
        config.storage.backend
    );

    // 3. Open database
    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    // 4. Clients and API-key users
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::from_config(config, db)?);

    // 5. Serve
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Bookkeeping server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {}", e);
    }
}

/// Initialize tracing to stdout. `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
