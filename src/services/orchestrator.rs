use std::{sync::Arc, time::Duration};

use chrono::Utc;
use ethers::types::Address;
use moka::future::Cache;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    error::PayoutError,
    models::{
        ChainLegResult, OverallStatus, PayoutOutcome, PayoutProgress, PayoutRequest,
        PayoutStatus, RawPayoutRequest,
    },
    services::{
        validate_idempotency_key, validate_payout_request, ChainRpc, ChainTransactionBuilder,
        CustodialKey, FiatProcessor, FiatRailAdapter, NonceManager, OperatorChannel,
        PayoutReconciler, RetryPolicy, TransactionBroadcaster, TransferSettings,
    },
};

/// Cap on remembered idempotency keys.
const MAX_REMEMBERED_OUTCOMES: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub transfer: TransferSettings,
    pub settlement_currency: String,
    pub fiat_timeout: Duration,
    pub rpc_timeout: Duration,
    pub rpc_retry_attempts: u32,
    pub idempotency_ttl: Duration,
}

/// One execution per idempotency key. The outcome channel is filled by the
/// detached task that runs the legs.
#[derive(Clone)]
struct PayoutEntry {
    progress: PayoutProgress,
    outcome: watch::Receiver<Option<PayoutOutcome>>,
}

struct PayoutExecutor {
    fiat: FiatRailAdapter,
    builder: ChainTransactionBuilder,
    broadcaster: TransactionBroadcaster,
    reconciler: PayoutReconciler,
    key: CustodialKey,
    operator: Arc<dyn OperatorChannel>,
}

pub struct PayoutOrchestrator {
    executor: Arc<PayoutExecutor>,
    payouts: Cache<String, PayoutEntry>,
}

impl PayoutOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        rpc: Arc<dyn ChainRpc>,
        processor: Arc<dyn FiatProcessor>,
        key: CustodialKey,
        operator: Arc<dyn OperatorChannel>,
    ) -> Self {
        let retry = RetryPolicy::new(settings.rpc_retry_attempts, settings.rpc_timeout);
        let nonces = Arc::new(NonceManager::new(rpc.clone(), retry.clone()));

        let payouts = Cache::builder()
            .max_capacity(MAX_REMEMBERED_OUTCOMES)
            .time_to_live(settings.idempotency_ttl)
            .build();

        let executor = PayoutExecutor {
            fiat: FiatRailAdapter::new(
                processor,
                settings.settlement_currency.clone(),
                settings.fiat_timeout,
            ),
            builder: ChainTransactionBuilder::new(rpc.clone(), nonces, settings.transfer, retry),
            broadcaster: TransactionBroadcaster::new(rpc, settings.rpc_timeout),
            reconciler: PayoutReconciler::new(settings.settlement_currency),
            key,
            operator,
        };

        Self {
            executor: Arc::new(executor),
            payouts,
        }
    }

    pub fn sender_address(&self) -> Address {
        self.executor.key.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.executor.builder.settings().chain_id
    }

    /// Validates and executes a payout, or replays the outcome already recorded
    /// for `idempotency_key`.
    ///
    /// The legs run on a detached task: dropping this future stops waiting but
    /// not the payout, and a retry with the same key joins the running one.
    pub async fn create_payout(
        &self,
        raw: &RawPayoutRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PayoutOutcome, PayoutError> {
        let request = validate_payout_request(raw)?;
        let idempotency_key = match idempotency_key {
            Some(key) => validate_idempotency_key(key)?,
            None => Uuid::new_v4().to_string(),
        };

        let payout_id = Uuid::new_v4();
        let entry = self
            .payouts
            .get_with(idempotency_key.clone(), async {
                self.start(payout_id, request.clone(), idempotency_key.clone())
            })
            .await;

        if entry.progress.request != request {
            return Err(PayoutError::IdempotencyConflict(idempotency_key));
        }
        if entry.progress.payout_id != payout_id {
            tracing::info!(
                payout_id = %entry.progress.payout_id,
                idempotency_key = %idempotency_key,
                "Joining recorded payout for idempotency key"
            );
        }

        let stopped = || {
            PayoutError::InternalError(format!(
                "payout {} stopped without an outcome",
                entry.progress.payout_id
            ))
        };

        let mut outcome = entry.outcome.clone();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| stopped())?
            .clone();

        finished.ok_or_else(stopped)
    }

    /// Out-of-band status query for a previously submitted key.
    pub async fn lookup(&self, idempotency_key: &str) -> Option<PayoutStatus> {
        let entry = self.payouts.get(idempotency_key).await?;
        let finished = entry.outcome.borrow().clone();

        Some(match finished {
            Some(outcome) => PayoutStatus::Finished(outcome),
            None => PayoutStatus::InProgress(entry.progress),
        })
    }

    fn start(&self, payout_id: Uuid, request: PayoutRequest, idempotency_key: String) -> PayoutEntry {
        let (tx, rx) = watch::channel(None);
        let progress = PayoutProgress {
            payout_id,
            idempotency_key: idempotency_key.clone(),
            request: request.clone(),
            started_at: Utc::now(),
        };

        let executor = self.executor.clone();
        tokio::spawn(async move {
            let outcome = executor.execute(payout_id, &request, &idempotency_key).await;
            tx.send_replace(Some(outcome));
        });

        PayoutEntry {
            progress,
            outcome: rx,
        }
    }
}

impl PayoutExecutor {
    async fn execute(
        &self,
        payout_id: Uuid,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> PayoutOutcome {
        tracing::info!(
            payout_id = %payout_id,
            idempotency_key = %idempotency_key,
            recipient = ?request.recipient_address,
            amount_minor_units = request.amount_minor_units,
            "Executing payout"
        );

        let (fiat, chain) = futures::future::join(
            self.fiat.execute_fiat_leg(request, idempotency_key),
            self.execute_chain_leg(request),
        )
        .await;

        let outcome = self
            .reconciler
            .reconcile(payout_id, request, idempotency_key, fiat, chain);

        match outcome.overall_status {
            OverallStatus::Succeeded => tracing::info!(
                payout_id = %payout_id,
                processor_payout_id = ?outcome.fiat_leg.processor_payout_id,
                tx_hash = ?outcome.chain_leg.transaction_hash,
                "Payout succeeded"
            ),
            status => tracing::warn!(
                payout_id = %payout_id,
                overall_status = ?status,
                recovery = ?outcome.recovery,
                "Payout did not fully succeed"
            ),
        }

        if outcome.requires_manual_review {
            self.operator.escalate(&outcome).await;
        }

        outcome
    }

    async fn execute_chain_leg(&self, request: &PayoutRequest) -> Result<ChainLegResult, PayoutError> {
        let sender = self.key.address();
        let intent = self.builder.build_transfer_intent(request, sender).await?;
        let nonce = intent.nonce;
        let nonces = self.builder.nonces();

        let sent = self.broadcaster.sign_and_send(intent, &self.key).await;
        match &sent {
            // Accepted, or possibly sitting in a mempool.
            Ok(_) => nonces.mark_spent(sender, nonce).await,
            Err(err) if err.is_outcome_unknown() => nonces.mark_spent(sender, nonce).await,
            Err(err) if err.is_nonce_rejection() => nonces.resync(sender, nonce).await,
            Err(_) => nonces.release(sender, nonce).await,
        }
        sent
    }
}
