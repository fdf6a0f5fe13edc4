use std::sync::Arc;

use anyhow::Context;

use ledgerd_infra::config::LedgerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledgerd_observability::init();

    let config = LedgerConfig::from_env().context("invalid configuration")?;

    let services = ledgerd_api::app::services::build_services(&config)
        .await
        .context("ledger startup failed")?;
    let app = ledgerd_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
