use anyhow::Result;
use payout_orchestrator::{
    config::Config,
    handlers::{router, AppState},
    services::*,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting payout orchestrator v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let rpc: Arc<dyn ChainRpc> = Arc::new(
        EthersRpc::connect(&config.rpc_url, config.rpc_fallback.as_deref(), config.chain_id)
            .await?,
    );
    let processor: Arc<dyn FiatProcessor> = Arc::new(StripePayoutClient::new(
        &config.stripe_api_base,
        &config.stripe_secret_key,
        config.fiat_timeout,
    )?);
    let operator: Arc<dyn OperatorChannel> = match &config.operator_webhook_url {
        Some(url) => Arc::new(WebhookOperatorChannel::new(url.clone())?),
        None => {
            tracing::warn!("OPERATOR_WEBHOOK_URL not set, escalations go to the log only");
            Arc::new(LogOperatorChannel)
        }
    };

    let orchestrator = Arc::new(PayoutOrchestrator::new(
        config.orchestrator_settings(),
        rpc.clone(),
        processor,
        config.custodial_key.clone(),
        operator,
    ));

    let app = router(AppState::new(orchestrator, rpc))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Create payout: POST http://{}/create-payout", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
