use std::sync::Arc;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    contracts::encode_transfer,
    error::PayoutError,
    models::{ChainTransactionIntent, PayoutRequest},
    services::{fetch_with_retry, ChainRpc, NonceManager, RetryPolicy},
};

/// Converts fiat minor units into the token's base unit.
///
/// `base_units = minor_units * 10^token_decimals / minor_units_per_major`
///
/// With the defaults (100 minor units per major, 18 decimals) 500 minor units
/// (5.00) become `5 * 10^18` base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenScaling {
    pub minor_units_per_major: u64,
    pub token_decimals: u8,
}

impl Default for TokenScaling {
    fn default() -> Self {
        Self {
            minor_units_per_major: 100,
            token_decimals: 18,
        }
    }
}

impl TokenScaling {
    pub fn validate(&self) -> Result<(), PayoutError> {
        if self.minor_units_per_major == 0 {
            return Err(PayoutError::ConfigError(
                "MINOR_UNITS_PER_MAJOR must be greater than zero".into(),
            ));
        }
        if self.token_decimals > 77 {
            return Err(PayoutError::ConfigError(format!(
                "TOKEN_DECIMALS {} overflows uint256",
                self.token_decimals
            )));
        }
        Ok(())
    }

    pub fn to_base_units(&self, minor_units: u64) -> Result<U256, PayoutError> {
        self.validate()?;

        let scale = U256::exp10(self.token_decimals as usize);
        let scaled = U256::from(minor_units)
            .checked_mul(scale)
            .ok_or_else(|| PayoutError::InvalidRequest("amount overflows token units".into()))?;

        let divisor = U256::from(self.minor_units_per_major);
        if !(scaled % divisor).is_zero() {
            return Err(PayoutError::InvalidRequest(format!(
                "{} minor units cannot be represented with {} token decimals",
                minor_units, self.token_decimals
            )));
        }

        Ok(scaled / divisor)
    }
}

/// Static parameters of the token transfer leg.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub token_contract: Address,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub scaling: TokenScaling,
}

pub struct ChainTransactionBuilder {
    rpc: Arc<dyn ChainRpc>,
    nonces: Arc<NonceManager>,
    settings: TransferSettings,
    retry: RetryPolicy,
}

impl ChainTransactionBuilder {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        nonces: Arc<NonceManager>,
        settings: TransferSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rpc,
            nonces,
            settings,
            retry,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    /// Builds an unsigned transfer from live network state.
    ///
    /// The nonce is reserved last so an earlier failure never burns one.
    pub async fn build_transfer_intent(
        &self,
        request: &PayoutRequest,
        sender: Address,
    ) -> Result<ChainTransactionIntent, PayoutError> {
        let gas_price = fetch_with_retry(&self.retry, "gas price", || self.rpc.gas_price()).await?;

        let token_amount = self.settings.scaling.to_base_units(request.amount_minor_units)?;
        let encoded_call_data = encode_transfer(request.recipient_address, token_amount);

        let nonce = self.nonces.reserve(sender).await?;

        tracing::info!(
            recipient = ?request.recipient_address,
            amount_minor_units = request.amount_minor_units,
            token_amount = %token_amount,
            gas_price = %gas_price,
            nonce = nonce,
            "Built transfer intent"
        );

        Ok(ChainTransactionIntent {
            from: sender,
            to: self.settings.token_contract,
            value_native: U256::zero(),
            gas_limit: U256::from(self.settings.gas_limit),
            gas_price_at_build_time: gas_price,
            nonce,
            chain_id: self.settings.chain_id,
            encoded_call_data,
            recipient: request.recipient_address,
            token_amount,
        })
    }
}
