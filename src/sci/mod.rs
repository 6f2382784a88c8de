use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use tokio::sync::mpsc;

pub mod http;
pub mod mock;

/// Chain tip or arbitrary block, as far as the core cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number:     u64,
    pub gas_limit:  U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// A confirmed (or failed) batch transfer, as handed to the confirmation
/// worker.
///
/// `fee` is the SCI's job to compute (gas used times whatever gas price the
/// transaction actually cleared at) - the core just records it.
#[derive(Debug, Clone, Copy)]
pub struct TransactionReceipt {
    pub tx_hash:      H256,
    pub block_number: u64,
    pub block_hash:   H256,
    pub fee:          U256,
    pub status:       ReceiptStatus,
}

/// The capabilities the payment processor needs from a smart-contract
/// client. Concrete implementations: [`http::HttpSci`] talks to a
/// transaction-relayer service; [`mock::MockSci`] is an in-memory stand-in
/// for tests.
#[async_trait]
pub trait SmartContractInterface: Send + Sync {
    async fn get_token_balance(&self) -> anyhow::Result<U256>;

    async fn get_gas_asset_balance(&self) -> anyhow::Result<U256>;

    async fn get_current_gas_price(&self) -> anyhow::Result<U256>;

    async fn get_latest_confirmed_block(&self) -> anyhow::Result<BlockInfo>;

    async fn get_block_by_number(&self, number: u64) -> anyhow::Result<BlockInfo>;

    /// Submits a batch transfer. `closure_time` is bookkeeping only: the
    /// boundary the caller is asserting has been settled up to, not
    /// something the chain itself needs to know about.
    async fn batch_transfer(
        &self,
        payments: &[(Address, U256)],
        closure_time: DateTime<Utc>,
    ) -> anyhow::Result<H256>;

    /// Registers interest in `tx_hash`'s confirmation. The receipt is
    /// delivered on `sender` once available, off whatever task is driving
    /// confirmation underneath - the caller must never be blocked waiting
    /// for it here.
    async fn on_transaction_confirmed(&self, tx_hash: H256, sender: mpsc::Sender<TransactionReceipt>);
}
