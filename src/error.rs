use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Leg;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Fiat leg failed: {0}")]
    FiatLegFailed(String),

    #[error("Chain leg failed: {0}")]
    ChainLegFailed(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("{leg} leg timed out after {elapsed_ms}ms, outcome unknown")]
    LegTimedOut {
        leg: Leg,
        elapsed_ms: u64,
        transaction_hash: Option<H256>,
    },

    #[error("{leg} leg outcome unknown: {reason}")]
    LegOutcomeUnknown {
        leg: Leg,
        reason: String,
        transaction_hash: Option<H256>,
    },

    #[error("Idempotency key {0} was already used for a different payout")]
    IdempotencyConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PayoutError {
    /// Stable machine-readable code, shared by HTTP bodies and leg failure markers.
    pub fn code(&self) -> &'static str {
        match self {
            PayoutError::InvalidRequest(_) => "INVALID_REQUEST",
            PayoutError::FiatLegFailed(_) => "FIAT_LEG_FAILED",
            PayoutError::ChainLegFailed(_) => "CHAIN_LEG_FAILED",
            PayoutError::NetworkUnavailable(_) => "NETWORK_UNAVAILABLE",
            PayoutError::SigningFailed(_) => "SIGNING_FAILED",
            PayoutError::BroadcastRejected(_) => "BROADCAST_REJECTED",
            PayoutError::LegTimedOut { .. } => "LEG_TIMED_OUT",
            PayoutError::LegOutcomeUnknown { .. } => "LEG_OUTCOME_UNKNOWN",
            PayoutError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            PayoutError::NotFound(_) => "NOT_FOUND",
            PayoutError::ConfigError(_) => "CONFIG_ERROR",
            PayoutError::InternalError(_) | PayoutError::AnyhowError(_) => "INTERNAL_ERROR",
        }
    }

    /// The side effect may have happened; the leg must be queried, never retried.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            PayoutError::LegTimedOut { .. } | PayoutError::LegOutcomeUnknown { .. }
        )
    }

    /// Hash of a signed transaction whose broadcast outcome is unknown.
    pub fn pending_transaction_hash(&self) -> Option<H256> {
        match self {
            PayoutError::LegTimedOut {
                transaction_hash, ..
            }
            | PayoutError::LegOutcomeUnknown {
                transaction_hash, ..
            } => *transaction_hash,
            _ => None,
        }
    }

    /// Node-side rejections that mean the reserved nonce can no longer be trusted.
    pub fn is_nonce_rejection(&self) -> bool {
        const NONCE_ERRORS: [&str; 3] = [
            "nonce too low",
            "nonce too high",
            "replacement transaction underpriced",
        ];

        match self {
            PayoutError::BroadcastRejected(reason) => {
                let reason = reason.to_lowercase();
                NONCE_ERRORS.iter().any(|needle| reason.contains(needle))
            }
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for PayoutError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        let status = match &self {
            PayoutError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PayoutError::IdempotencyConflict(_) => StatusCode::CONFLICT,
            PayoutError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error_code = self.code();

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code = error_code, "Request failed");
        } else {
            tracing::warn!(error = %self, error_code = error_code, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}
