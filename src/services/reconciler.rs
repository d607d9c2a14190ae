//! Folds the two independently resolved legs into one [`PayoutOutcome`].
//!
//! | fiat    | chain   | overall      | recovery                         |
//! |---------|---------|--------------|----------------------------------|
//! | settled | settled | `succeeded`  | none                             |
//! | settled | failed  | `fiatOnly`   | manual reconciliation            |
//! | failed  | settled | `chainOnly`  | manual reconciliation            |
//! | failed  | failed  | `failed`     | retry with a new idempotency key |
//! | unknown | any     | `unresolved` | query leg status out of band     |
//!
//! Nothing here compensates or retries.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::PayoutError,
    models::{
        ChainLegResult, ChainReceiptStatus, FiatLegResult, FiatLegStatus, OverallStatus,
        PayoutOutcome, PayoutRequest, RecoveryAction,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegState {
    Settled,
    Failed,
    Unknown,
}

fn fiat_state(leg: &FiatLegResult) -> LegState {
    match leg.status {
        FiatLegStatus::Pending | FiatLegStatus::Paid => LegState::Settled,
        FiatLegStatus::Failed => LegState::Failed,
        FiatLegStatus::Unknown => LegState::Unknown,
    }
}

fn chain_state(leg: &ChainLegResult) -> LegState {
    match leg.receipt_status {
        ChainReceiptStatus::Pending | ChainReceiptStatus::Confirmed => LegState::Settled,
        ChainReceiptStatus::Reverted | ChainReceiptStatus::Failed => LegState::Failed,
        ChainReceiptStatus::Unknown => LegState::Unknown,
    }
}

pub fn classify(fiat: &FiatLegResult, chain: &ChainLegResult) -> (OverallStatus, RecoveryAction) {
    match (fiat_state(fiat), chain_state(chain)) {
        (LegState::Unknown, _) | (_, LegState::Unknown) => {
            (OverallStatus::Unresolved, RecoveryAction::QueryLegStatus)
        }
        (LegState::Settled, LegState::Settled) => (OverallStatus::Succeeded, RecoveryAction::None),
        (LegState::Settled, LegState::Failed) => {
            (OverallStatus::FiatOnly, RecoveryAction::ManualReconciliation)
        }
        (LegState::Failed, LegState::Settled) => {
            (OverallStatus::ChainOnly, RecoveryAction::ManualReconciliation)
        }
        (LegState::Failed, LegState::Failed) => {
            (OverallStatus::Failed, RecoveryAction::RetryWithNewIdempotencyKey)
        }
    }
}

pub struct PayoutReconciler {
    settlement_currency: String,
}

impl PayoutReconciler {
    pub fn new(settlement_currency: impl Into<String>) -> Self {
        Self {
            settlement_currency: settlement_currency.into(),
        }
    }

    pub fn reconcile(
        &self,
        payout_id: Uuid,
        request: &PayoutRequest,
        idempotency_key: &str,
        fiat: Result<FiatLegResult, PayoutError>,
        chain: Result<ChainLegResult, PayoutError>,
    ) -> PayoutOutcome {
        let fiat_leg = fiat.unwrap_or_else(|err| {
            FiatLegResult::from_error(request, &self.settlement_currency, idempotency_key, &err)
        });
        let chain_leg = chain.unwrap_or_else(|err| ChainLegResult::from_error(&err));

        let (overall_status, recovery) = classify(&fiat_leg, &chain_leg);
        let requires_manual_review = matches!(
            overall_status,
            OverallStatus::FiatOnly | OverallStatus::ChainOnly | OverallStatus::Unresolved
        );

        PayoutOutcome {
            payout_id,
            idempotency_key: idempotency_key.to_string(),
            request: request.clone(),
            fiat_leg,
            chain_leg,
            overall_status,
            recovery,
            requires_manual_review,
            created_at: Utc::now(),
        }
    }
}
