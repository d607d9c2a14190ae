use std::{fmt, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::services::{FiatProcessor, ProcessorError, ProcessorPayout, ProcessorPayoutRequest};

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Stripe `POST /v1/payouts` client.
pub struct StripePayoutClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripePayoutClient {
    pub fn new(api_base: &str, secret_key: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

impl fmt::Debug for StripePayoutClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripePayoutClient")
            .field("api_base", &self.api_base)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl FiatProcessor for StripePayoutClient {
    async fn create_payout(
        &self,
        payout: &ProcessorPayoutRequest,
        idempotency_key: &str,
    ) -> Result<ProcessorPayout, ProcessorError> {
        let amount = payout.amount.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", payout.currency.as_str()),
            ("destination", payout.destination.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payouts", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_builder() {
                    ProcessorError::Unreachable(e.to_string())
                } else {
                    ProcessorError::Indeterminate(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Indeterminate(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str::<ProcessorPayout>(&body).map_err(|e| {
                ProcessorError::Indeterminate(format!("unreadable payout object: {}", e))
            });
        }

        // 5xx after delivery: the payout may or may not exist.
        if status.is_server_error() {
            tracing::warn!(status = %status, "Processor returned a server error");
            return Err(ProcessorError::Indeterminate(format!("processor returned {}", status)));
        }

        let rejection = match serde_json::from_str::<StripeErrorEnvelope>(&body) {
            Ok(envelope) => ProcessorError::Rejected {
                code: envelope.error.code.or(envelope.error.kind),
                message: envelope
                    .error
                    .message
                    .unwrap_or_else(|| format!("processor returned {}", status)),
            },
            Err(_) => ProcessorError::Rejected {
                code: None,
                message: format!("processor returned {}", status),
            },
        };

        tracing::warn!(status = %status, error = %rejection, "Processor rejected payout");
        Err(rejection)
    }
}
