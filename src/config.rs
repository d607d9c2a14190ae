use anyhow::{bail, Context, Result};
use ethers::types::Address;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::contracts::POLYGON_USDC_ADDRESS;
use crate::services::{CustodialKey, OrchestratorSettings, TokenScaling, TransferSettings};

/// Lowest gas ceiling accepted for an ERC-20 transfer.
pub const MIN_TRANSFER_GAS_LIMIT: u64 = 65_000;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Chain rail
    pub rpc_url: String,
    pub rpc_fallback: Option<String>,
    pub chain_id: u64,
    pub token_contract: Address,
    pub token_scaling: TokenScaling,
    pub gas_limit: u64,
    pub custodial_key: CustodialKey,

    // Fiat rail
    pub stripe_secret_key: String,
    pub stripe_api_base: String,
    pub settlement_currency: String,

    // Timeouts and retries
    pub fiat_timeout: Duration,
    pub rpc_timeout: Duration,
    pub rpc_retry_attempts: u32,
    pub idempotency_ttl: Duration,

    pub operator_webhook_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("chain_id", &self.chain_id)
            .field("token_contract", &self.token_contract)
            .field("token_scaling", &self.token_scaling)
            .field("gas_limit", &self.gas_limit)
            .field("custodial_key", &self.custodial_key)
            .field("stripe_api_base", &self.stripe_api_base)
            .field("settlement_currency", &self.settlement_currency)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let private_key = Zeroizing::new(
            std::env::var("PAYOUT_WALLET_PRIVATE_KEY")
                .context("PAYOUT_WALLET_PRIVATE_KEY required")?,
        );
        let custodial_key = CustodialKey::from_hex(&private_key)
            .context("Invalid PAYOUT_WALLET_PRIVATE_KEY")?;
        drop(private_key);

        let config = Self {
            environment: environment.clone(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_or("PORT", "4000")?,

            rpc_url: std::env::var("POLYGON_RPC_URL").context("POLYGON_RPC_URL required")?,
            rpc_fallback: std::env::var("POLYGON_RPC_FALLBACK").ok(),
            chain_id: Self::parse_or("CHAIN_ID", "137")?,
            token_contract: Self::parse_address_or("TOKEN_CONTRACT_ADDRESS", POLYGON_USDC_ADDRESS)?,
            token_scaling: TokenScaling {
                minor_units_per_major: Self::parse_or("MINOR_UNITS_PER_MAJOR", "100")?,
                token_decimals: Self::parse_or("TOKEN_DECIMALS", "18")?,
            },
            gas_limit: Self::parse_or("GAS_LIMIT", "2000000")?,
            custodial_key,

            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY")
                .context("STRIPE_SECRET_KEY required")?,
            stripe_api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            settlement_currency: std::env::var("SETTLEMENT_CURRENCY")
                .unwrap_or_else(|_| "usdc".to_string())
                .to_lowercase(),

            fiat_timeout: Duration::from_secs(Self::parse_or("FIAT_TIMEOUT_SECS", "30")?),
            rpc_timeout: Duration::from_secs(Self::parse_or("RPC_TIMEOUT_SECS", "15")?),
            rpc_retry_attempts: Self::parse_or("RPC_RETRY_ATTEMPTS", "3")?,
            idempotency_ttl: Duration::from_secs(Self::parse_or("IDEMPOTENCY_TTL_SECS", "86400")?),

            operator_webhook_url: std::env::var("OPERATOR_WEBHOOK_URL").ok(),
        };

        if let Ok(expected) = std::env::var("PAYOUT_WALLET_ADDRESS") {
            let expected = Address::from_str(&expected)
                .context("Invalid address for PAYOUT_WALLET_ADDRESS")?;
            if expected != config.custodial_key.address() {
                bail!("PAYOUT_WALLET_ADDRESS does not match PAYOUT_WALLET_PRIVATE_KEY");
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_or<T>(var: &str, default: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        std::env::var(var)
            .unwrap_or_else(|_| default.to_string())
            .parse()
            .with_context(|| format!("Invalid {}", var))
    }

    fn parse_address_or(var: &str, default: &str) -> Result<Address> {
        let addr_str = std::env::var(var).unwrap_or_else(|_| default.to_string());
        Address::from_str(&addr_str).with_context(|| format!("Invalid address for {}", var))
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            transfer: TransferSettings {
                token_contract: self.token_contract,
                chain_id: self.chain_id,
                gas_limit: self.gas_limit,
                scaling: self.token_scaling,
            },
            settlement_currency: self.settlement_currency.clone(),
            fiat_timeout: self.fiat_timeout,
            rpc_timeout: self.rpc_timeout,
            rpc_retry_attempts: self.rpc_retry_attempts,
            idempotency_ttl: self.idempotency_ttl,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") {
            bail!("POLYGON_RPC_URL must be HTTP(S) URL");
        }
        if let Some(fallback) = &self.rpc_fallback {
            if !fallback.starts_with("http") {
                bail!("POLYGON_RPC_FALLBACK must be HTTP(S) URL");
            }
        }
        if !self.stripe_api_base.starts_with("http") {
            bail!("STRIPE_API_BASE must be HTTP(S) URL");
        }
        if let Some(webhook) = &self.operator_webhook_url {
            if !webhook.starts_with("http") {
                bail!("OPERATOR_WEBHOOK_URL must be HTTP(S) URL");
            }
        }

        if self.gas_limit < MIN_TRANSFER_GAS_LIMIT {
            bail!(
                "GAS_LIMIT {} is below the {} needed for a token transfer",
                self.gas_limit,
                MIN_TRANSFER_GAS_LIMIT
            );
        }
        self.token_scaling.validate()?;

        if self.rpc_retry_attempts == 0 {
            bail!("RPC_RETRY_ATTEMPTS must be at least 1");
        }
        if self.fiat_timeout.is_zero() || self.rpc_timeout.is_zero() {
            bail!("Timeouts must be greater than zero");
        }
        if self.settlement_currency.len() < 3 {
            bail!("SETTLEMENT_CURRENCY must be an ISO-style currency code");
        }

        tracing::info!(
            environment = ?self.environment,
            chain_id = self.chain_id,
            token_decimals = self.token_scaling.token_decimals,
            sender = %self.custodial_key.address(),
            "Configuration validated"
        );

        Ok(())
    }
}
