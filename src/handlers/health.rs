use axum::{extract::State, Json};
use chrono::Utc;
use ethers::utils::to_checksum;
use std::time::Duration;

use crate::{handlers::AppState, models::HealthStatus};

const RPC_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let rpc_ok = matches!(
        tokio::time::timeout(RPC_CHECK_TIMEOUT, state.rpc.gas_price()).await,
        Ok(Ok(_))
    );

    let status = if rpc_ok { "healthy" } else { "degraded" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chain_rpc: rpc_ok,
        chain_id: state.orchestrator.chain_id(),
        sender_address: to_checksum(&state.orchestrator.sender_address(), None),
        uptime_seconds: state.started.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
