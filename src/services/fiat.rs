use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{timeout, Instant};

use crate::{
    error::PayoutError,
    models::{FiatLegResult, FiatLegStatus, Leg, LegFailure, PayoutRequest},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorPayoutRequest {
    pub amount: u64,
    pub currency: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessorPayout {
    pub id: String,
    pub status: String,
    pub currency: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The processor answered and refused the payout.
    #[error("{message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    /// The request never left this process (connection refused, DNS, TLS).
    #[error("processor unreachable: {0}")]
    Unreachable(String),

    /// The request may have been delivered but no answer was read.
    #[error("processor response lost: {0}")]
    Indeterminate(String),
}

/// The payment processor's create-payout call.
#[async_trait]
pub trait FiatProcessor: Send + Sync {
    async fn create_payout(
        &self,
        payout: &ProcessorPayoutRequest,
        idempotency_key: &str,
    ) -> Result<ProcessorPayout, ProcessorError>;
}

pub fn map_processor_status(status: &str) -> FiatLegStatus {
    match status {
        "paid" => FiatLegStatus::Paid,
        "pending" | "in_transit" => FiatLegStatus::Pending,
        "failed" | "canceled" => FiatLegStatus::Failed,
        _ => FiatLegStatus::Unknown,
    }
}

pub struct FiatRailAdapter {
    processor: Arc<dyn FiatProcessor>,
    currency: String,
    timeout: Duration,
}

impl FiatRailAdapter {
    pub fn new(processor: Arc<dyn FiatProcessor>, currency: impl Into<String>, timeout: Duration) -> Self {
        Self {
            processor,
            currency: currency.into(),
            timeout,
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Creates the processor-side payout. Submitted once per call, keyed by `idempotency_key`.
    pub async fn execute_fiat_leg(
        &self,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> Result<FiatLegResult, PayoutError> {
        let payout = ProcessorPayoutRequest {
            amount: request.amount_minor_units,
            currency: self.currency.clone(),
            destination: to_checksum(&request.recipient_address, None),
        };

        let started = Instant::now();
        let created = timeout(
            self.timeout,
            self.processor.create_payout(&payout, idempotency_key),
        )
        .await;

        let created = match created {
            Ok(Ok(created)) => created,
            Ok(Err(ProcessorError::Rejected { code, message })) => {
                let detail = match code {
                    Some(code) => format!("{} ({})", message, code),
                    None => message,
                };
                return Err(PayoutError::FiatLegFailed(detail));
            }
            Ok(Err(err @ ProcessorError::Unreachable(_))) => {
                return Err(PayoutError::FiatLegFailed(err.to_string()));
            }
            Ok(Err(ProcessorError::Indeterminate(reason))) => {
                tracing::warn!(
                    idempotency_key = idempotency_key,
                    error = %reason,
                    "Processor response lost, fiat outcome unknown"
                );
                return Err(PayoutError::LegOutcomeUnknown {
                    leg: Leg::Fiat,
                    reason,
                    transaction_hash: None,
                });
            }
            Err(_) => {
                return Err(PayoutError::LegTimedOut {
                    leg: Leg::Fiat,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    transaction_hash: None,
                });
            }
        };

        let status = map_processor_status(&created.status);
        tracing::info!(
            processor_payout_id = %created.id,
            status = %created.status,
            amount_minor_units = request.amount_minor_units,
            "Fiat payout created"
        );

        let failure = (status == FiatLegStatus::Failed).then(|| {
            LegFailure::from(&PayoutError::FiatLegFailed(format!(
                "processor payout {} ended in status {}",
                created.id, created.status
            )))
        });

        Ok(FiatLegResult {
            processor_payout_id: Some(created.id),
            status,
            currency: created.currency,
            amount_minor_units: request.amount_minor_units,
            idempotency_key: idempotency_key.to_string(),
            failure,
        })
    }
}
