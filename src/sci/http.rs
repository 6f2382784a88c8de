use std::time::Duration;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use sci_client::data::{BatchTransferRequest, TransferItem};
use sci_client::SciHttpClient;
use tokio::sync::mpsc;
use tracing::{error, instrument, warn};

use super::{BlockInfo, ReceiptStatus, SmartContractInterface, TransactionReceipt};

/// [`SmartContractInterface`] backed by an HTTP transaction-relayer service.
pub struct HttpSci {
    client:                    SciHttpClient,
    token:                     Address,
    owner:                     Address,
    confirmation_poll_interval: Duration,
}

impl HttpSci {
    #[must_use]
    pub fn new(
        url: impl ToString,
        token: Address,
        owner: Address,
        confirmation_poll_interval: Duration,
    ) -> Self {
        Self {
            client: SciHttpClient::new(url),
            token,
            owner,
            confirmation_poll_interval,
        }
    }
}

#[async_trait::async_trait]
impl SmartContractInterface for HttpSci {
    #[instrument(skip(self))]
    async fn get_token_balance(&self) -> anyhow::Result<U256> {
        self.client.token_balance(self.token, self.owner).await
    }

    #[instrument(skip(self))]
    async fn get_gas_asset_balance(&self) -> anyhow::Result<U256> {
        self.client.gas_asset_balance(self.owner).await
    }

    #[instrument(skip(self))]
    async fn get_current_gas_price(&self) -> anyhow::Result<U256> {
        self.client.current_gas_price().await
    }

    #[instrument(skip(self))]
    async fn get_latest_confirmed_block(&self) -> anyhow::Result<BlockInfo> {
        let block = self.client.latest_confirmed_block().await?;
        Ok(BlockInfo {
            number:    block.number,
            gas_limit: block.gas_limit,
        })
    }

    #[instrument(skip(self))]
    async fn get_block_by_number(&self, number: u64) -> anyhow::Result<BlockInfo> {
        let block = self.client.block_by_number(number).await?;
        Ok(BlockInfo {
            number:    block.number,
            gas_limit: block.gas_limit,
        })
    }

    #[instrument(skip(self, payments))]
    async fn batch_transfer(
        &self,
        payments: &[(Address, U256)],
        closure_time: DateTime<Utc>,
    ) -> anyhow::Result<H256> {
        let request = BatchTransferRequest {
            token:     self.token,
            transfers: payments
                .iter()
                .map(|(to, value)| TransferItem {
                    to:    *to,
                    value: *value,
                })
                .collect(),
            tx_id: Some(format!("batch-{}", closure_time.timestamp())),
        };

        let response = self.client.batch_transfer(&request).await?;
        let tx = self.client.get_tx(&response.tx_id).await?;

        tx.tx_hash
            .ok_or_else(|| anyhow::anyhow!("submitted tx {} has no hash yet", response.tx_id))
    }

    #[instrument(skip(self, sender))]
    async fn on_transaction_confirmed(
        &self,
        tx_hash: H256,
        sender: mpsc::Sender<TransactionReceipt>,
    ) {
        let tx_id = format!("{tx_hash:#x}");
        let client = self.client.clone();
        let poll_interval = self.confirmation_poll_interval;

        tokio::spawn(async move {
            match client.poll_until_confirmed(&tx_id, poll_interval).await {
                Ok(confirmed) => {
                    let receipt = TransactionReceipt {
                        tx_hash:      confirmed.tx_hash,
                        block_number: confirmed.block_number,
                        block_hash:   confirmed.block_hash,
                        fee:          confirmed.fee,
                        status:       ReceiptStatus::Success,
                    };
                    if sender.send(receipt).await.is_err() {
                        warn!(?tx_hash, "confirmation worker dropped before receipt delivery");
                    }
                }
                Err(err) => {
                    error!(?tx_hash, ?err, "batch transfer failed on-chain");
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
        });
    }
}
