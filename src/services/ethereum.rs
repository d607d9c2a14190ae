use anyhow::{bail, Result};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider, ProviderError, RpcError},
    types::{Address, BlockId, BlockNumber, Bytes, H256, U256},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainRpcError {
    /// Transport failure: the node may never have seen the call.
    #[error("RPC unavailable: {0}")]
    Unavailable(String),

    /// The node answered with a JSON-RPC error.
    #[error("RPC rejected: {0}")]
    Rejected(String),
}

impl From<ProviderError> for ChainRpcError {
    fn from(err: ProviderError) -> Self {
        match RpcError::as_error_response(&err) {
            Some(rpc) => ChainRpcError::Rejected(rpc.message.clone()),
            None => ChainRpcError::Unavailable(err.to_string()),
        }
    }
}

/// The blockchain node operations the payout path consumes.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn gas_price(&self) -> Result<U256, ChainRpcError>;

    /// Transaction count including pending transactions.
    async fn transaction_count(&self, address: Address) -> Result<U256, ChainRpcError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainRpcError>;
}

pub struct EthersRpc {
    primary: Arc<Provider<Http>>,
    fallback: Option<Arc<Provider<Http>>>,
}

impl EthersRpc {
    pub async fn connect(
        rpc_url: &str,
        fallback_url: Option<&str>,
        expected_chain_id: u64,
    ) -> Result<Self> {
        let primary = Arc::new(Provider::<Http>::try_from(rpc_url)?);

        let fallback = if let Some(url) = fallback_url {
            Some(Arc::new(Provider::<Http>::try_from(url)?))
        } else {
            None
        };

        let chain_id = primary.get_chainid().await?;
        if chain_id != U256::from(expected_chain_id) {
            bail!(
                "RPC endpoint reports chain id {} but {} is configured",
                chain_id,
                expected_chain_id
            );
        }

        let block_number = primary.get_block_number().await?;
        tracing::info!(
            chain_id = expected_chain_id,
            block = %block_number,
            fallback = fallback.is_some(),
            "Chain RPC connected"
        );

        Ok(Self { primary, fallback })
    }

    fn should_fall_back(&self, err: &ProviderError) -> bool {
        self.fallback.is_some() && RpcError::as_error_response(err).is_none()
    }
}

#[async_trait]
impl ChainRpc for EthersRpc {
    async fn gas_price(&self) -> Result<U256, ChainRpcError> {
        match self.primary.get_gas_price().await {
            Ok(price) => Ok(price),
            Err(e) if self.should_fall_back(&e) => {
                tracing::warn!(error = %e, "Primary RPC failed, trying fallback");
                match &self.fallback {
                    Some(fallback) => fallback.get_gas_price().await.map_err(Into::into),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainRpcError> {
        let block: Option<BlockId> = Some(BlockNumber::Pending.into());
        match self.primary.get_transaction_count(address, block).await {
            Ok(count) => Ok(count),
            Err(e) if self.should_fall_back(&e) => {
                tracing::warn!(error = %e, "Primary RPC failed, trying fallback");
                match &self.fallback {
                    Some(fallback) => fallback
                        .get_transaction_count(address, block)
                        .await
                        .map_err(Into::into),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainRpcError> {
        // Resending identical signed bytes to another node cannot double-spend;
        // it carries the same nonce and hash.
        match self.primary.send_raw_transaction(raw.clone()).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) if self.should_fall_back(&e) => {
                tracing::warn!(error = %e, "Primary RPC failed to accept transaction, trying fallback");
                match &self.fallback {
                    Some(fallback) => fallback
                        .send_raw_transaction(raw)
                        .await
                        .map(|pending| pending.tx_hash())
                        .map_err(Into::into),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn rpc_against(url: &str) -> EthersRpc {
        EthersRpc {
            primary: Arc::new(Provider::<Http>::try_from(url).unwrap()),
            fallback: None,
        }
    }

    #[test]
    fn transport_errors_are_unavailable() {
        let err: ChainRpcError = ProviderError::CustomError("connection refused".into()).into();
        assert!(matches!(err, ChainRpcError::Unavailable(_)));
    }

    #[tokio::test]
    async fn gas_price_is_decoded_from_hex_quantity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(r#"{"method":"eth_gasPrice"}"#.into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x3b9aca00"}"#)
            .create_async()
            .await;

        let rpc = rpc_against(&server.url());
        let price = rpc.gas_price().await.unwrap();

        assert_eq!(price, U256::from(1_000_000_000u64));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn json_rpc_errors_on_broadcast_are_rejections() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_sendRawTransaction"}"#.into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#)
            .create_async()
            .await;

        let rpc = rpc_against(&server.url());
        let err = rpc
            .send_raw_transaction(Bytes::from(vec![0xf8, 0x6b]))
            .await
            .unwrap_err();

        assert_eq!(err, ChainRpcError::Rejected("nonce too low".into()));
    }
}
