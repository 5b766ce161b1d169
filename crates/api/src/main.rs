use anyhow::Context;

use chargeflow_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chargeflow_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let services = chargeflow_api::app::services::build_services(&config)
        .context("failed to wire ledger services")?;
    let app = chargeflow_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        store = config.store.label(),
        "listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
