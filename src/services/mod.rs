pub mod builder;
pub mod ethereum;
pub mod fiat;
pub mod nonce;
pub mod operator;
pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod signer;
pub mod stripe;
pub mod validator;

pub use builder::{ChainTransactionBuilder, TokenScaling, TransferSettings};
pub use ethereum::{ChainRpc, ChainRpcError, EthersRpc};
pub use fiat::{FiatProcessor, FiatRailAdapter, ProcessorError, ProcessorPayout, ProcessorPayoutRequest};
pub use nonce::NonceManager;
pub use operator::{LogOperatorChannel, OperatorAlert, OperatorChannel, WebhookOperatorChannel};
pub use orchestrator::{OrchestratorSettings, PayoutOrchestrator};
pub use reconciler::PayoutReconciler;
pub use retry::{fetch_with_retry, RetryPolicy};
pub use signer::{sign_intent, CustodialKey, SignedTransaction, TransactionBroadcaster};
pub use stripe::StripePayoutClient;
pub use validator::{validate_idempotency_key, validate_payout_request};
