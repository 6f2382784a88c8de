use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use tokio::sync::mpsc;

use super::{BlockInfo, ReceiptStatus, SmartContractInterface, TransactionReceipt};

#[derive(Debug, Clone)]
struct State {
    token_balance:    U256,
    gas_asset_balance: U256,
    gas_price:        U256,
    block:            BlockInfo,
    submitted:        Vec<(Vec<(Address, U256)>, DateTime<Utc>)>,
    next_tx_hash:     u64,
    pending:          HashMap<H256, mpsc::Sender<TransactionReceipt>>,
}

/// In-memory stand-in for [`SmartContractInterface`], for tests that have no
/// business talking to a real relayer.
///
/// Balances and gas price are fixed at construction and can be adjusted with
/// the `set_*` methods; `batch_transfer` always succeeds and hands back a
/// synthetic, deterministic tx hash. `on_transaction_confirmed` just files the
/// sender away; a test drives confirmation explicitly with
/// [`MockSci::confirm`] / [`MockSci::fail`], which deliver a receipt on the
/// same channel the real confirmation worker reads from.
pub struct MockSci {
    state: Mutex<State>,
}

impl MockSci {
    #[must_use]
    pub fn new(token_balance: U256, gas_asset_balance: U256, gas_price: U256, block_gas_limit: U256) -> Self {
        Self {
            state: Mutex::new(State {
                token_balance,
                gas_asset_balance,
                gas_price,
                block: BlockInfo {
                    number:    1,
                    gas_limit: block_gas_limit,
                },
                submitted: Vec::new(),
                next_tx_hash: 1,
                pending: HashMap::new(),
            }),
        }
    }

    pub fn set_token_balance(&self, value: U256) {
        self.state.lock().unwrap().token_balance = value;
    }

    pub fn set_gas_asset_balance(&self, value: U256) {
        self.state.lock().unwrap().gas_asset_balance = value;
    }

    pub fn set_gas_price(&self, value: U256) {
        self.state.lock().unwrap().gas_price = value;
    }

    pub fn set_block_gas_limit(&self, value: U256) {
        self.state.lock().unwrap().block.gas_limit = value;
    }

    #[must_use]
    pub fn submitted_batches(&self) -> Vec<(Vec<(Address, U256)>, DateTime<Utc>)> {
        self.state.lock().unwrap().submitted.clone()
    }

    fn next_tx_hash(&self) -> H256 {
        let mut state = self.state.lock().unwrap();
        let seed = state.next_tx_hash;
        state.next_tx_hash += 1;

        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&seed.to_be_bytes());
        H256::from(bytes)
    }

    /// Delivers a `Success` receipt for `tx_hash` to whoever registered
    /// interest in it via `on_transaction_confirmed`. No-op if nobody did.
    pub async fn confirm(&self, tx_hash: H256, block_number: u64, block_hash: H256, fee: U256) {
        let sender = self.state.lock().unwrap().pending.remove(&tx_hash);
        if let Some(sender) = sender {
            let receipt = TransactionReceipt {
                tx_hash,
                block_number,
                block_hash,
                fee,
                status: ReceiptStatus::Success,
            };
            let _ = sender.send(receipt).await;
        }
    }

    /// Delivers a `Failure` receipt for `tx_hash`. No-op if nobody registered
    /// interest in it.
    pub async fn fail(&self, tx_hash: H256) {
        let sender = self.state.lock().unwrap().pending.remove(&tx_hash);
        if let Some(sender) = sender {
            let receipt = TransactionReceipt {
                tx_hash,
                block_number: 0,
                block_hash: H256::zero(),
                fee: U256::zero(),
                status: ReceiptStatus::Failure,
            };
            let _ = sender.send(receipt).await;
        }
    }
}

#[async_trait::async_trait]
impl SmartContractInterface for MockSci {
    async fn get_token_balance(&self) -> anyhow::Result<U256> {
        Ok(self.state.lock().unwrap().token_balance)
    }

    async fn get_gas_asset_balance(&self) -> anyhow::Result<U256> {
        Ok(self.state.lock().unwrap().gas_asset_balance)
    }

    async fn get_current_gas_price(&self) -> anyhow::Result<U256> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn get_latest_confirmed_block(&self) -> anyhow::Result<BlockInfo> {
        Ok(self.state.lock().unwrap().block)
    }

    async fn get_block_by_number(&self, number: u64) -> anyhow::Result<BlockInfo> {
        let mut block = self.state.lock().unwrap().block;
        block.number = number;
        Ok(block)
    }

    async fn batch_transfer(
        &self,
        payments: &[(Address, U256)],
        closure_time: DateTime<Utc>,
    ) -> anyhow::Result<H256> {
        let tx_hash = self.next_tx_hash();
        self.state
            .lock()
            .unwrap()
            .submitted
            .push((payments.to_vec(), closure_time));
        Ok(tx_hash)
    }

    async fn on_transaction_confirmed(&self, tx_hash: H256, sender: mpsc::Sender<TransactionReceipt>) {
        self.state.lock().unwrap().pending.insert(tx_hash, sender);
    }
}
