#![allow(dead_code)]

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    types::{Address, Bytes, H256, U256},
    utils::keccak256,
};
use payout_orchestrator::{
    contracts::POLYGON_USDC_ADDRESS,
    models::{PayoutOutcome, RawPayoutRequest},
    services::{
        ChainRpc, ChainRpcError, CustodialKey, FiatProcessor, OperatorChannel,
        OrchestratorSettings, PayoutOrchestrator, ProcessorError, ProcessorPayout,
        ProcessorPayoutRequest, TokenScaling, TransferSettings,
    },
};
use serde_json::json;

/// Well-known development key (anvil account #0).
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TEST_SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

pub fn raw_request(recipient: &str, amount: serde_json::Value) -> RawPayoutRequest {
    serde_json::from_value(json!({
        "recipientAddress": recipient,
        "amountMinorUnits": amount,
    }))
    .unwrap()
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        transfer: TransferSettings {
            token_contract: Address::from_str(POLYGON_USDC_ADDRESS).unwrap(),
            chain_id: 137,
            gas_limit: 2_000_000,
            scaling: TokenScaling::default(),
        },
        settlement_currency: "usdc".into(),
        fiat_timeout: Duration::from_secs(30),
        rpc_timeout: Duration::from_secs(15),
        rpc_retry_attempts: 3,
        idempotency_ttl: Duration::from_secs(3600),
    }
}

pub struct FakeRpc {
    pub base_nonce: u64,
    pub gas_delay: Option<Duration>,
    pub send_error: Option<ChainRpcError>,
    pub gas_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
    pub sent: Mutex<Vec<Bytes>>,
}

impl FakeRpc {
    pub fn new(base_nonce: u64) -> Self {
        Self {
            base_nonce,
            gas_delay: None,
            send_error: None,
            gas_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_gas_delay(mut self, delay: Duration) -> Self {
        self.gas_delay = Some(delay);
        self
    }

    pub fn rejecting_sends(mut self, reason: &str) -> Self {
        self.send_error = Some(ChainRpcError::Rejected(reason.to_string()));
        self
    }

    /// The request goes out but the response never comes back.
    pub fn dropping_sends(mut self) -> Self {
        self.send_error = Some(ChainRpcError::Unavailable("connection reset by peer".into()));
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn external_calls(&self) -> usize {
        self.gas_calls.load(Ordering::SeqCst)
            + self.count_calls.load(Ordering::SeqCst)
            + self.sent_count()
    }
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn gas_price(&self) -> Result<U256, ChainRpcError> {
        self.gas_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.gas_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(U256::from(30_000_000_000u64))
    }

    async fn transaction_count(&self, _address: Address) -> Result<U256, ChainRpcError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(U256::from(self.base_nonce))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainRpcError> {
        self.sent.lock().unwrap().push(raw.clone());
        match &self.send_error {
            Some(err) => Err(err.clone()),
            None => Ok(H256::from(keccak256(&raw))),
        }
    }
}

pub enum ProcessorBehavior {
    Pay,
    Reject,
    /// Accepted by the processor, then reported failed.
    FailAfterCreate,
    Stall(Duration),
}

pub struct FakeProcessor {
    pub behavior: ProcessorBehavior,
    pub calls: Mutex<Vec<(ProcessorPayoutRequest, String)>>,
}

impl FakeProcessor {
    pub fn new(behavior: ProcessorBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FiatProcessor for FakeProcessor {
    async fn create_payout(
        &self,
        payout: &ProcessorPayoutRequest,
        idempotency_key: &str,
    ) -> Result<ProcessorPayout, ProcessorError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((payout.clone(), idempotency_key.to_string()));
            calls.len()
        };

        match &self.behavior {
            ProcessorBehavior::Pay => Ok(ProcessorPayout {
                id: format!("po_{}", call_number),
                status: "paid".into(),
                currency: payout.currency.clone(),
            }),
            ProcessorBehavior::FailAfterCreate => Ok(ProcessorPayout {
                id: format!("po_{}", call_number),
                status: "failed".into(),
                currency: payout.currency.clone(),
            }),
            ProcessorBehavior::Reject => Err(ProcessorError::Rejected {
                code: Some("balance_insufficient".into()),
                message: "Insufficient funds in account".into(),
            }),
            ProcessorBehavior::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Err(ProcessorError::Indeterminate("stalled".into()))
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingOperator {
    pub alerts: Mutex<Vec<PayoutOutcome>>,
}

impl RecordingOperator {
    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl OperatorChannel for RecordingOperator {
    async fn escalate(&self, outcome: &PayoutOutcome) {
        self.alerts.lock().unwrap().push(outcome.clone());
    }
}

pub struct Harness {
    pub orchestrator: Arc<PayoutOrchestrator>,
    pub rpc: Arc<FakeRpc>,
    pub processor: Arc<FakeProcessor>,
    pub operator: Arc<RecordingOperator>,
}

impl Harness {
    pub fn new(rpc: FakeRpc, processor: FakeProcessor) -> Self {
        let rpc = Arc::new(rpc);
        let processor = Arc::new(processor);
        let operator = Arc::new(RecordingOperator::default());

        let orchestrator = Arc::new(PayoutOrchestrator::new(
            settings(),
            rpc.clone(),
            processor.clone(),
            CustodialKey::from_hex(TEST_KEY).unwrap(),
            operator.clone(),
        ));

        Self {
            orchestrator,
            rpc,
            processor,
            operator,
        }
    }

    pub fn healthy() -> Self {
        Self::new(FakeRpc::new(7), FakeProcessor::new(ProcessorBehavior::Pay))
    }
}
