use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use action_log_tracker::{config::Config, db, handlers, notify::SmsNotifier, state::AppState, sweep};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    info!(bind_addr = %config.bind_addr, "starting action log tracker");

    let pool = db::connect_and_bootstrap(&config)
        .await
        .context("database bootstrap failed")?;

    let notifier = SmsNotifier::from_config(&config);

    sweep::start(pool.clone(), config.delegation_sweep_interval_secs);

    let state = AppState {
        config: config.clone(),
        db: pool,
        notifier,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    axum::serve(listener, handlers::router(state))
        .await
        .context("server exited")?;

    Ok(())
}
