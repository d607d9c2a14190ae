//! Per-account nonce assignment.
//!
//! Each sending account owns a counter guarded by its own async mutex. The
//! counter is seeded from the node's pending transaction count the first time
//! it is used and is incremented locally afterwards, so concurrent payouts never
//! observe the same value.
//!
//! Every reservation must be settled exactly once:
//! - [`NonceManager::mark_spent`] when the node accepted the transaction or may
//!   have (timeouts, lost responses);
//! - [`NonceManager::release`] when it certainly never reached a mempool, so the
//!   value is handed out again before any fresh one;
//! - [`NonceManager::resync`] when the node rejected the nonce itself. The
//!   counter is re-read from the network once no other reservation is in flight,
//!   and never moves below values already handed out.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use ethers::types::Address;
use tokio::sync::Mutex;

use crate::{
    error::PayoutError,
    services::{fetch_with_retry, ChainRpc, RetryPolicy},
};

#[derive(Debug, Default)]
struct AccountNonces {
    next: Option<u64>,
    outstanding: BTreeSet<u64>,
    released: BTreeSet<u64>,
    stale: bool,
}

impl AccountNonces {
    fn needs_seed(&self) -> bool {
        self.next.is_none() || (self.stale && self.outstanding.is_empty())
    }

    /// Takes the network count into account without reissuing local values.
    fn seed(&mut self, network: u64) {
        let next = self.next.map_or(network, |local| local.max(network));
        self.released.retain(|&nonce| nonce >= network);
        self.next = Some(next);
        self.stale = false;
    }

    fn settle(&mut self, nonce: u64) -> bool {
        self.outstanding.remove(&nonce)
    }
}

type Slot = Arc<Mutex<AccountNonces>>;

pub struct NonceManager {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
    accounts: Mutex<HashMap<Address, Slot>>,
}

impl NonceManager {
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy) -> Self {
        Self {
            rpc,
            retry,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, account: Address) -> Slot {
        let mut accounts = self.accounts.lock().await;
        accounts.entry(account).or_default().clone()
    }

    async fn network_count(&self, account: Address) -> Result<u64, PayoutError> {
        let count = fetch_with_retry(&self.retry, "transaction count", || {
            self.rpc.transaction_count(account)
        })
        .await?;

        if count.bits() > 64 {
            return Err(PayoutError::ChainLegFailed(format!(
                "transaction count {} for {:?} does not fit a nonce",
                count, account
            )));
        }
        Ok(count.as_u64())
    }

    /// Hands out the next nonce for `account`. Callers queue on the account's lock.
    pub async fn reserve(&self, account: Address) -> Result<u64, PayoutError> {
        let slot = self.slot(account).await;
        let mut state = slot.lock().await;

        if state.needs_seed() {
            let network = self.network_count(account).await?;
            state.seed(network);
            tracing::debug!(account = ?account, network = network, next = ?state.next, "Seeded nonce from network");
        }

        let nonce = match state.released.pop_first() {
            Some(released) => released,
            None => {
                let nonce = state.next.unwrap_or_default();
                let following = nonce
                    .checked_add(1)
                    .ok_or_else(|| PayoutError::ChainLegFailed("nonce space exhausted".into()))?;
                state.next = Some(following);
                nonce
            }
        };
        state.outstanding.insert(nonce);

        tracing::debug!(account = ?account, nonce = nonce, "Reserved nonce");
        Ok(nonce)
    }

    /// The transaction carrying `nonce` reached, or may have reached, a node.
    pub async fn mark_spent(&self, account: Address, nonce: u64) {
        let slot = self.slot(account).await;
        let mut state = slot.lock().await;
        state.settle(nonce);
    }

    /// `nonce` was never broadcast and can be handed out again.
    pub async fn release(&self, account: Address, nonce: u64) {
        let slot = self.slot(account).await;
        let mut state = slot.lock().await;
        if !state.settle(nonce) {
            tracing::warn!(account = ?account, nonce = nonce, "Released a nonce that was not reserved");
            return;
        }

        if state.next == nonce.checked_add(1) {
            // Latest reservation: roll back, then absorb any released run below it.
            let mut next = nonce;
            while next > 0 && state.released.remove(&(next - 1)) {
                next -= 1;
            }
            state.next = Some(next);
        } else {
            state.released.insert(nonce);
        }
        tracing::debug!(account = ?account, nonce = nonce, next = ?state.next, "Released nonce");
    }

    /// The node rejected `nonce` itself; re-read the network count once idle.
    pub async fn resync(&self, account: Address, nonce: u64) {
        let slot = self.slot(account).await;
        let mut state = slot.lock().await;
        state.settle(nonce);
        state.stale = true;
        tracing::warn!(
            account = ?account,
            nonce = nonce,
            in_flight = state.outstanding.len(),
            "Nonce rejected by node, counter will resync from network"
        );
    }

    /// Next fresh nonce, if the counter has been seeded.
    pub async fn peek(&self, account: Address) -> Option<u64> {
        let slot = self.slot(account).await;
        let state = slot.lock().await;
        state.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ChainRpcError;
    use async_trait::async_trait;
    use ethers::types::{Bytes, H256, U256};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingRpc {
        count: AtomicU64,
        lookups: AtomicU64,
    }

    #[async_trait]
    impl ChainRpc for CountingRpc {
        async fn gas_price(&self) -> Result<U256, ChainRpcError> {
            Ok(U256::one())
        }

        async fn transaction_count(&self, _address: Address) -> Result<U256, ChainRpcError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(U256::from(self.count.load(Ordering::SeqCst)))
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<H256, ChainRpcError> {
            Ok(H256::zero())
        }
    }

    fn manager(start: u64) -> (NonceManager, Arc<CountingRpc>) {
        let rpc = Arc::new(CountingRpc {
            count: AtomicU64::new(start),
            lookups: AtomicU64::new(0),
        });
        (NonceManager::new(rpc.clone(), RetryPolicy::default()), rpc)
    }

    #[tokio::test]
    async fn seeds_once_then_counts_locally() {
        let (nonces, rpc) = manager(7);
        let account = Address::repeat_byte(1);

        assert_eq!(nonces.reserve(account).await.unwrap(), 7);
        assert_eq!(nonces.reserve(account).await.unwrap(), 8);
        assert_eq!(nonces.reserve(account).await.unwrap(), 9);
        assert_eq!(rpc.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(nonces.peek(account).await, Some(10));
    }

    #[tokio::test]
    async fn released_latest_nonce_rolls_the_counter_back() {
        let (nonces, rpc) = manager(3);
        let account = Address::repeat_byte(2);

        assert_eq!(nonces.reserve(account).await.unwrap(), 3);
        nonces.release(account, 3).await;

        assert_eq!(nonces.peek(account).await, Some(3));
        assert_eq!(nonces.reserve(account).await.unwrap(), 3);
        assert_eq!(rpc.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_nonce_behind_an_in_flight_one_is_reused_first() {
        let (nonces, _rpc) = manager(0);
        let account = Address::repeat_byte(3);

        let a = nonces.reserve(account).await.unwrap();
        let b = nonces.reserve(account).await.unwrap();
        assert_eq!((a, b), (0, 1));

        // A never left the process; B is broadcast and still pending.
        nonces.release(account, a).await;

        let c = nonces.reserve(account).await.unwrap();
        let d = nonces.reserve(account).await.unwrap();
        assert_eq!(c, 0);
        assert_eq!(d, 2);
        assert_ne!(d, b);
    }

    #[tokio::test]
    async fn resync_waits_for_in_flight_reservations() {
        let (nonces, rpc) = manager(5);
        let account = Address::repeat_byte(4);

        let a = nonces.reserve(account).await.unwrap();
        let b = nonces.reserve(account).await.unwrap();
        assert_eq!((a, b), (5, 6));

        // Something outside this process consumed 5 and 6.
        rpc.count.store(7, Ordering::SeqCst);
        nonces.resync(account, a).await;

        // B is still in flight, so the local counter keeps going.
        assert_eq!(nonces.reserve(account).await.unwrap(), 7);
        assert_eq!(rpc.lookups.load(Ordering::SeqCst), 1);

        nonces.mark_spent(account, b).await;
        nonces.mark_spent(account, 7).await;
        rpc.count.store(9, Ordering::SeqCst);

        // Idle: the next reservation re-reads the network.
        assert_eq!(nonces.reserve(account).await.unwrap(), 9);
        assert_eq!(rpc.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resync_never_moves_below_handed_out_values() {
        let (nonces, rpc) = manager(10);
        let account = Address::repeat_byte(5);

        assert_eq!(nonces.reserve(account).await.unwrap(), 10);
        nonces.mark_spent(account, 10).await;
        assert_eq!(nonces.reserve(account).await.unwrap(), 11);

        // A lagging node still reports the old count.
        rpc.count.store(10, Ordering::SeqCst);
        nonces.resync(account, 11).await;

        assert_eq!(nonces.reserve(account).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn accounts_have_independent_counters() {
        let (nonces, _rpc) = manager(0);
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);

        assert_eq!(nonces.reserve(a).await.unwrap(), 0);
        assert_eq!(nonces.reserve(a).await.unwrap(), 1);
        assert_eq!(nonces.reserve(b).await.unwrap(), 0);
    }
}
