pub mod health;
pub mod payout;

pub use health::*;
pub use payout::*;

use axum::{
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Instant};

use crate::services::{ChainRpc, PayoutOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PayoutOrchestrator>,
    pub rpc: Arc<dyn ChainRpc>,
    pub started: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<PayoutOrchestrator>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            orchestrator,
            rpc,
            started: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/create-payout", post(create_payout))
        .route("/payouts/:idempotency_key", get(get_payout))
        .with_state(state)
}
