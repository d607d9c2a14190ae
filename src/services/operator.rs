use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{OverallStatus, PayoutOutcome, RecoveryAction};

/// Where alarm states (`fiatOnly`, `chainOnly`, `unresolved`) are reported.
///
/// Escalation never fails the payout; implementations log what they cannot deliver.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn escalate(&self, outcome: &PayoutOutcome);
}

#[derive(Debug, Serialize)]
pub struct OperatorAlert<'a> {
    pub severity: &'static str,
    pub payout_id: Uuid,
    pub idempotency_key: &'a str,
    pub overall_status: OverallStatus,
    pub recovery: RecoveryAction,
    pub summary: String,
    pub outcome: &'a PayoutOutcome,
    pub raised_at: DateTime<Utc>,
}

impl<'a> OperatorAlert<'a> {
    pub fn for_outcome(outcome: &'a PayoutOutcome) -> Self {
        let summary = match outcome.overall_status {
            OverallStatus::FiatOnly => {
                "Processor payout created with no matching on-chain transfer".to_string()
            }
            OverallStatus::ChainOnly => {
                "On-chain transfer broadcast with no matching processor payout".to_string()
            }
            OverallStatus::Unresolved => {
                "At least one leg timed out; query its status before acting".to_string()
            }
            other => format!("Payout finished as {:?}", other),
        };

        Self {
            severity: "critical",
            payout_id: outcome.payout_id,
            idempotency_key: &outcome.idempotency_key,
            overall_status: outcome.overall_status,
            recovery: outcome.recovery,
            summary,
            outcome,
            raised_at: Utc::now(),
        }
    }
}

fn log_alert(outcome: &PayoutOutcome) {
    tracing::error!(
        payout_id = %outcome.payout_id,
        idempotency_key = %outcome.idempotency_key,
        overall_status = ?outcome.overall_status,
        recovery = ?outcome.recovery,
        fiat_status = ?outcome.fiat_leg.status,
        processor_payout_id = ?outcome.fiat_leg.processor_payout_id,
        chain_status = ?outcome.chain_leg.receipt_status,
        tx_hash = ?outcome.chain_leg.transaction_hash,
        "Payout legs disagree, manual reconciliation required"
    );
}

pub struct LogOperatorChannel;

#[async_trait]
impl OperatorChannel for LogOperatorChannel {
    async fn escalate(&self, outcome: &PayoutOutcome) {
        log_alert(outcome);
    }
}

pub struct WebhookOperatorChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookOperatorChannel {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, alert: &OperatorAlert<'_>) -> Result<()> {
        let response = self.client.post(&self.url).json(alert).send().await?;

        if response.status().is_success() {
            tracing::debug!(payout_id = %alert.payout_id, "Operator alert delivered");
        } else {
            anyhow::bail!("operator webhook returned {}", response.status());
        }

        Ok(())
    }
}

#[async_trait]
impl OperatorChannel for WebhookOperatorChannel {
    async fn escalate(&self, outcome: &PayoutOutcome) {
        log_alert(outcome);

        let alert = OperatorAlert::for_outcome(outcome);
        if let Err(e) = self.post(&alert).await {
            tracing::error!(
                payout_id = %outcome.payout_id,
                error = %e,
                "Failed to deliver operator alert"
            );
        }
    }
}
