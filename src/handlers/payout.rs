use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::PayoutError,
    handlers::AppState,
    models::{ApiResponse, OverallStatus, PayoutOutcome, PayoutStatus, RawPayoutRequest},
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn idempotency_key(headers: &HeaderMap) -> Result<Option<&str>, PayoutError> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| PayoutError::InvalidRequest("Idempotency-Key must be ASCII".into()))
        })
        .transpose()
}

fn respond(status: StatusCode, message: &str, outcome: PayoutOutcome) -> (StatusCode, Json<ApiResponse<PayoutOutcome>>) {
    (
        status,
        Json(ApiResponse {
            success: status.is_success(),
            message: message.to_string(),
            data: outcome,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }),
    )
}

/// `POST /create-payout`
///
/// 200 only when both legs settled. Any other outcome is still returned in full,
/// with a 500 so naive clients do not treat it as success.
pub async fn create_payout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RawPayoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<PayoutOutcome>>), PayoutError> {
    let Json(raw) = body.map_err(|rejection| PayoutError::InvalidRequest(rejection.body_text()))?;
    let key = idempotency_key(&headers)?;

    let outcome = state.orchestrator.create_payout(&raw, key).await?;

    Ok(match outcome.overall_status {
        OverallStatus::Succeeded => respond(StatusCode::OK, "Payout executed on both rails", outcome),
        OverallStatus::FiatOnly | OverallStatus::ChainOnly => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Payout partially executed, escalated for manual reconciliation",
            outcome,
        ),
        OverallStatus::Unresolved => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Payout outcome unknown, query leg status before retrying",
            outcome,
        ),
        OverallStatus::Failed => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Payout failed on both rails",
            outcome,
        ),
    })
}

/// `GET /payouts/:idempotency_key`
///
/// 200 with the outcome once both legs are reconciled, 202 while they run.
pub async fn get_payout(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, PayoutError> {
    let status = state
        .orchestrator
        .lookup(&key)
        .await
        .ok_or_else(|| PayoutError::NotFound(format!("no payout recorded for key {}", key)))?;

    Ok(match status {
        PayoutStatus::Finished(outcome) => Json(ApiResponse {
            success: true,
            message: format!("Payout is {:?}", outcome.overall_status),
            data: outcome,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        })
        .into_response(),
        PayoutStatus::InProgress(progress) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse {
                success: true,
                message: "Payout legs are still executing".to_string(),
                data: progress,
                timestamp: Utc::now(),
                request_id: Uuid::new_v4().to_string(),
            }),
        )
            .into_response(),
    })
}
