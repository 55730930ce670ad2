//! The wallet capability consumed by the rest of the crate.
//!
//! Everything that talks to the user's wallet goes through [`ChainLink`]. The controller only
//! ever holds an `Arc<dyn ChainLink>`, so the production JSON-RPC provider and in-memory test
//! doubles are interchangeable.

use crate::chain::ChainError;

use ethers::types::{Address, Bytes, H256, Log, U256};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

/// A state-changing call to be signed and broadcast by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionCall {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    /// Gas ceiling passed to the wallet; the wallet does not estimate above it.
    pub gas_limit: u64,
}

/// Outcome of a mined transaction as reported by its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub succeeded: bool,
}

/// Handle for a stream of provider notifications.
///
/// Dropping the handle or calling [`Subscription::unsubscribe`] stops delivery and aborts the
/// background worker feeding it, if any. Unsubscribing is idempotent.
pub struct Subscription<T> {
    label: &'static str,
    receiver: mpsc::UnboundedReceiver<T>,
    worker: Option<AbortHandle>,
    active: bool,
}

impl<T> Subscription<T> {
    /// Create a subscription together with the sender that feeds it.
    pub fn channel(label: &'static str) -> (mpsc::UnboundedSender<T>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Self {
            label,
            receiver,
            worker: None,
            active: true,
        };
        (sender, subscription)
    }

    /// Tie a background task to this subscription; it is aborted on unsubscribe.
    pub fn with_worker(mut self, worker: AbortHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Wait for the next notification. Returns `None` once unsubscribed or when the feeding
    /// side has gone away.
    pub async fn next(&mut self) -> Option<T> {
        if !self.active {
            return None;
        }
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<T> {
        if !self.active {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.receiver.close();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        debug!("Unsubscribed from {}", self.label);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.active)
            .finish()
    }
}

/// Narrow capability interface over the user's wallet/provider.
#[async_trait::async_trait]
pub trait ChainLink: Send + Sync {
    /// True iff a wallet provider is configured for this session.
    fn is_available(&self) -> bool;

    /// Interactive account request (`eth_requestAccounts`). Returns the first account.
    async fn request_accounts(&self) -> Result<Address, ChainError>;

    /// Accounts already authorised for this client (`eth_accounts`). Never prompts.
    async fn list_accounts(&self) -> Result<Vec<Address>, ChainError>;

    async fn current_chain_id(&self) -> Result<u64, ChainError>;

    /// Balance of `address` in wei.
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Read-only contract call (`eth_call` against the latest block).
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Hand a transaction to the wallet for signing and broadcast. Returns its hash.
    async fn send_transaction(&self, call: TransactionCall) -> Result<H256, ChainError>;

    /// Receipt lookup; `None` while the transaction is still pending.
    async fn transaction_status(&self, tx_hash: H256) -> Result<Option<ReceiptStatus>, ChainError>;

    /// Live logs emitted by `address` whose first topic is `topic`.
    async fn subscribe_logs(
        &self,
        address: Address,
        topic: H256,
    ) -> Result<Subscription<Log>, ChainError>;

    /// Notifications carrying the new authorised account list.
    async fn on_accounts_changed(&self) -> Result<Subscription<Vec<Address>>, ChainError>;

    /// Notifications carrying the new chain id.
    async fn on_chain_changed(&self) -> Result<Subscription<u64>, ChainError>;
}
