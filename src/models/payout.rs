use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PayoutError;

/// One side of a dual-rail payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Fiat,
    Chain,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Fiat => write!(f, "fiat"),
            Leg::Chain => write!(f, "chain"),
        }
    }
}

/// Payout intent exactly as received over HTTP, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayoutRequest {
    #[serde(default, alias = "recipient_address", alias = "recipient_polygon_usdc_address")]
    pub recipient_address: Option<String>,

    #[serde(default, alias = "amount_minor_units", alias = "amount")]
    pub amount_minor_units: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub recipient_address: Address,
    pub amount_minor_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFailure {
    pub code: String,
    pub message: String,
}

impl From<&PayoutError> for LegFailure {
    fn from(err: &PayoutError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiatLegStatus {
    Pending,
    Paid,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiatLegResult {
    pub processor_payout_id: Option<String>,
    pub status: FiatLegStatus,
    pub currency: String,
    pub amount_minor_units: u64,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<LegFailure>,
}

impl FiatLegResult {
    /// Failure marker built from an error that never reached a terminal processor state.
    pub fn from_error(
        request: &PayoutRequest,
        currency: &str,
        idempotency_key: &str,
        err: &PayoutError,
    ) -> Self {
        let status = if err.is_outcome_unknown() {
            FiatLegStatus::Unknown
        } else {
            FiatLegStatus::Failed
        };

        Self {
            processor_payout_id: None,
            status,
            currency: currency.to_string(),
            amount_minor_units: request.amount_minor_units,
            idempotency_key: idempotency_key.to_string(),
            failure: Some(err.into()),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, FiatLegStatus::Pending | FiatLegStatus::Paid)
    }
}

/// Unsigned token transfer, built fresh for every payout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTransactionIntent {
    pub from: Address,
    pub to: Address,
    pub value_native: U256,
    pub gas_limit: U256,
    pub gas_price_at_build_time: U256,
    pub nonce: u64,
    pub chain_id: u64,
    pub encoded_call_data: Bytes,
    pub recipient: Address,
    pub token_amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainReceiptStatus {
    Pending,
    Confirmed,
    Reverted,
    Unknown,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLegResult {
    pub transaction_hash: Option<H256>,
    pub receipt_status: ChainReceiptStatus,
    pub nonce: Option<u64>,
    pub token_amount: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<LegFailure>,
}

impl ChainLegResult {
    pub fn from_error(err: &PayoutError) -> Self {
        let receipt_status = if err.is_outcome_unknown() {
            ChainReceiptStatus::Unknown
        } else {
            ChainReceiptStatus::Failed
        };

        Self {
            transaction_hash: err.pending_transaction_hash(),
            receipt_status,
            nonce: None,
            token_amount: None,
            failure: Some(err.into()),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.receipt_status,
            ChainReceiptStatus::Pending | ChainReceiptStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverallStatus {
    Succeeded,
    FiatOnly,
    ChainOnly,
    Failed,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    None,
    RetryWithNewIdempotencyKey,
    ManualReconciliation,
    QueryLegStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutOutcome {
    pub payout_id: Uuid,
    pub idempotency_key: String,
    pub request: PayoutRequest,
    pub fiat_leg: FiatLegResult,
    pub chain_leg: ChainLegResult,
    pub overall_status: OverallStatus,
    pub recovery: RecoveryAction,
    pub requires_manual_review: bool,
    pub created_at: DateTime<Utc>,
}

/// A payout whose legs are still executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutProgress {
    pub payout_id: Uuid,
    pub idempotency_key: String,
    pub request: PayoutRequest,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutStatus {
    InProgress(PayoutProgress),
    Finished(PayoutOutcome),
}
mod tests {
    use super::*;

    #[test]
    fn raw_request_accepts_legacy_field_names() {
        let raw: RawPayoutRequest = serde_json::from_str(
            r#"{"recipient_polygon_usdc_address":"0xabc","amount":1000}"#,
        )
        .unwrap();
        assert_eq!(raw.recipient_address.as_deref(), Some("0xabc"));
        assert_eq!(raw.amount_minor_units, Some(serde_json::json!(1000)));

        let raw: RawPayoutRequest =
            serde_json::from_str(r#"{"recipientAddress":"0xdef","amountMinorUnits":5}"#).unwrap();
        assert_eq!(raw.recipient_address.as_deref(), Some("0xdef"));
    }

    #[test]
    fn overall_status_uses_camel_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(OverallStatus::FiatOnly).unwrap(),
            serde_json::json!("fiatOnly")
        );
        assert_eq!(
            serde_json::to_value(RecoveryAction::ManualReconciliation).unwrap(),
            serde_json::json!("manual_reconciliation")
        );
    }

    #[test]
    fn chain_timeout_keeps_the_local_hash() {
        let hash = H256::repeat_byte(0x11);
        let err = PayoutError::LegTimedOut {
            leg: Leg::Chain,
            elapsed_ms: 15_000,
            transaction_hash: Some(hash),
        };

        let leg = ChainLegResult::from_error(&err);
        assert_eq!(leg.receipt_status, ChainReceiptStatus::Unknown);
        assert_eq!(leg.transaction_hash, Some(hash));
        assert!(!leg.is_settled());
    }
}
