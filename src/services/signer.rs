use std::{fmt, sync::Arc, time::Duration};

use ethers::{
    prelude::*,
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, H256},
    utils::keccak256,
};
use tokio::time::{timeout, Instant};
use zeroize::Zeroizing;

use crate::{
    error::PayoutError,
    models::{ChainLegResult, ChainReceiptStatus, ChainTransactionIntent, Leg},
    services::{ChainRpc, ChainRpcError},
};

/// The custodial signing key.
///
/// Holds only the raw secret bytes, zeroed on drop. A wallet is materialized
/// for a single signature and dropped before the signing call returns.
#[derive(Clone)]
pub struct CustodialKey {
    secret: Arc<Zeroizing<[u8; 32]>>,
    address: Address,
}

impl CustodialKey {
    pub fn from_hex(hex_key: &str) -> Result<Self, PayoutError> {
        let trimmed = hex_key.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        let mut secret = Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(digits, &mut secret[..]).map_err(|_| {
            PayoutError::SigningFailed("custodial key must be 32 bytes of hex".into())
        })?;

        let wallet = LocalWallet::from_bytes(&secret[..])
            .map_err(|_| PayoutError::SigningFailed("custodial key is not a valid secp256k1 scalar".into()))?;
        let address = wallet.address();

        Ok(Self {
            secret: Arc::new(secret),
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, tx: &TypedTransaction, chain_id: u64) -> Result<Signature, PayoutError> {
        let wallet = LocalWallet::from_bytes(&self.secret[..])
            .map_err(|_| PayoutError::SigningFailed("custodial key could not be loaded".into()))?
            .with_chain_id(chain_id);

        wallet
            .sign_transaction_sync(tx)
            .map_err(|e| PayoutError::SigningFailed(e.to_string()))
    }
}

impl fmt::Debug for CustodialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodialKey")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// RLP-encoded signed transaction. Exists only between signing and broadcast.
pub struct SignedTransaction {
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub fn hash(&self) -> H256 {
        self.hash
    }

    fn into_raw(self) -> Bytes {
        self.raw
    }
}

impl fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("hash", &self.hash)
            .field("raw", &format_args!("<{} bytes>", self.raw.len()))
            .finish()
    }
}

pub fn sign_intent(
    intent: &ChainTransactionIntent,
    key: &CustodialKey,
) -> Result<SignedTransaction, PayoutError> {
    if intent.from != key.address() {
        return Err(PayoutError::SigningFailed(format!(
            "intent sender {:?} does not match custodial key {:?}",
            intent.from,
            key.address()
        )));
    }

    let tx: TypedTransaction = TransactionRequest::new()
        .from(intent.from)
        .to(intent.to)
        .value(intent.value_native)
        .gas(intent.gas_limit)
        .gas_price(intent.gas_price_at_build_time)
        .nonce(intent.nonce)
        .chain_id(intent.chain_id)
        .data(intent.encoded_call_data.clone())
        .into();

    let signature = key.sign(&tx, intent.chain_id)?;
    let raw = tx.rlp_signed(&signature);
    let hash = H256::from(keccak256(&raw));

    Ok(SignedTransaction { raw, hash })
}

fn is_already_known(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    reason.contains("already known") || reason.contains("known transaction")
}

pub struct TransactionBroadcaster {
    rpc: Arc<dyn ChainRpc>,
    timeout: Duration,
}

impl TransactionBroadcaster {
    pub fn new(rpc: Arc<dyn ChainRpc>, timeout: Duration) -> Self {
        Self { rpc, timeout }
    }

    /// Signs and submits `intent`, returning as soon as the node accepts it.
    ///
    /// Confirmation is not awaited: a successful result is always `pending`.
    pub async fn sign_and_send(
        &self,
        intent: ChainTransactionIntent,
        key: &CustodialKey,
    ) -> Result<ChainLegResult, PayoutError> {
        let signed = sign_intent(&intent, key)?;
        let local_hash = signed.hash();

        tracing::info!(
            tx_hash = ?local_hash,
            nonce = intent.nonce,
            chain_id = intent.chain_id,
            "Broadcasting signed transfer"
        );

        let started = Instant::now();
        let sent = timeout(self.timeout, self.rpc.send_raw_transaction(signed.into_raw())).await;

        let node_hash = match sent {
            Ok(Ok(hash)) => hash,
            Ok(Err(ChainRpcError::Rejected(reason))) if is_already_known(&reason) => {
                // The node holds these exact bytes, e.g. after a fallback resend.
                tracing::warn!(tx_hash = ?local_hash, "Node already knows transaction, treating as broadcast");
                local_hash
            }
            Ok(Err(ChainRpcError::Rejected(reason))) => {
                return Err(PayoutError::BroadcastRejected(reason));
            }
            Ok(Err(ChainRpcError::Unavailable(reason))) => {
                // The request may have been delivered before the transport failed.
                return Err(PayoutError::LegOutcomeUnknown {
                    leg: Leg::Chain,
                    reason,
                    transaction_hash: Some(local_hash),
                });
            }
            Err(_) => {
                return Err(PayoutError::LegTimedOut {
                    leg: Leg::Chain,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    transaction_hash: Some(local_hash),
                });
            }
        };

        if node_hash != local_hash {
            tracing::warn!(
                local = ?local_hash,
                node = ?node_hash,
                "Node reported a different transaction hash"
            );
        }

        Ok(ChainLegResult {
            transaction_hash: Some(node_hash),
            receipt_status: ChainReceiptStatus::Pending,
            nonce: Some(intent.nonce),
            token_amount: Some(intent.token_amount),
            failure: None,
        })
    }
}
