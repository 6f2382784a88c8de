use data::{
    BalanceResponse, BatchTransferRequest, BatchTransferResponse, BlockResponse, GasPriceResponse,
    GetTxResponse, TxStatus,
};
use ethers::types::{Address, H256, U256};
use reqwest::Response;
use tracing::instrument;

pub mod data;

/// Thin HTTP client for an external transaction-submission service.
///
/// Mirrors the wire protocol of a tx-sitter style relayer: callers submit
/// transaction intents and poll for their mined/finalized status rather than
/// receiving a push callback.
#[derive(Clone)]
pub struct SciHttpClient {
    client: reqwest::Client,
    url:    String,
}

impl SciHttpClient {
    pub fn new(url: impl ToString) -> Self {
        Self {
            client: reqwest::Client::new(),
            url:    url.to_string(),
        }
    }

    async fn json_post<T, R>(&self, url: &str, body: T) -> anyhow::Result<R>
    where
        T: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let response = self.client.post(url).json(&body).send().await?;

        let response = Self::validate_response(response).await?;

        Ok(response.json().await?)
    }

    async fn json_get<R>(&self, url: &str) -> anyhow::Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let response = self.client.get(url).send().await?;

        let response = Self::validate_response(response).await?;

        Ok(response.json().await?)
    }

    async fn validate_response(response: Response) -> anyhow::Result<Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;

            tracing::error!("Response failed with status {} - {}", status, body);
            return Err(anyhow::anyhow!(
                "Response failed with status {status} - {body}"
            ));
        }

        Ok(response)
    }

    #[instrument(skip(self))]
    pub async fn token_balance(&self, token: Address, owner: Address) -> anyhow::Result<U256> {
        let url = format!("{}/balance/{:?}/{:?}", self.url, token, owner);
        let resp: BalanceResponse = self.json_get(&url).await?;
        Ok(resp.balance)
    }

    #[instrument(skip(self))]
    pub async fn gas_asset_balance(&self, owner: Address) -> anyhow::Result<U256> {
        let url = format!("{}/balance/gas/{:?}", self.url, owner);
        let resp: BalanceResponse = self.json_get(&url).await?;
        Ok(resp.balance)
    }

    #[instrument(skip(self))]
    pub async fn current_gas_price(&self) -> anyhow::Result<U256> {
        let url = format!("{}/gasPrice", self.url);
        let resp: GasPriceResponse = self.json_get(&url).await?;
        Ok(resp.gas_price)
    }

    #[instrument(skip(self))]
    pub async fn latest_confirmed_block(&self) -> anyhow::Result<BlockResponse> {
        let url = format!("{}/blocks/latest", self.url);
        self.json_get(&url).await
    }

    #[instrument(skip(self))]
    pub async fn block_by_number(&self, number: u64) -> anyhow::Result<BlockResponse> {
        let url = format!("{}/blocks/{number}", self.url);
        self.json_get(&url).await
    }

    #[instrument(skip(self))]
    pub async fn batch_transfer(
        &self,
        req: &BatchTransferRequest,
    ) -> anyhow::Result<BatchTransferResponse> {
        self.json_post(&format!("{}/batchTransfer", self.url), req)
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_tx(&self, tx_id: &str) -> anyhow::Result<GetTxResponse> {
        self.json_get(&format!("{}/tx/{}", self.url, tx_id)).await
    }

    #[instrument(skip(self))]
    pub async fn get_txs_by_status(
        &self,
        tx_status: TxStatus,
    ) -> anyhow::Result<Vec<GetTxResponse>> {
        let url = format!("{}/txs?status={}", self.url, tx_status);

        self.json_get(&url).await
    }

    /// Polls a submitted transfer until it is mined or finalized.
    ///
    /// The underlying service reports confirmation by status flag rather than
    /// by push callback, so the caller (the confirmation handler) dispatches
    /// this to an independent worker instead of blocking the submission path.
    #[instrument(skip(self))]
    pub async fn poll_until_confirmed(
        &self,
        tx_id: &str,
        poll_interval: std::time::Duration,
    ) -> anyhow::Result<ConfirmedTransfer> {
        loop {
            let tx = self.get_tx(tx_id).await?;

            match tx.status {
                Some(TxStatus::Mined | TxStatus::Finalized) => {
                    let tx_hash = tx
                        .tx_hash
                        .ok_or_else(|| anyhow::anyhow!("mined tx {tx_id} is missing a tx hash"))?;
                    let block_number = tx.block_number.ok_or_else(|| {
                        anyhow::anyhow!("mined tx {tx_id} is missing a block number")
                    })?;
                    let block_hash = tx.block_hash.ok_or_else(|| {
                        anyhow::anyhow!("mined tx {tx_id} is missing a block hash")
                    })?;
                    let gas_used = tx.gas_used.ok_or_else(|| {
                        anyhow::anyhow!("mined tx {tx_id} is missing its gas used")
                    })?;
                    let fee = tx.effective_gas_price.unwrap_or_default().saturating_mul(gas_used);

                    return Ok(ConfirmedTransfer {
                        tx_hash,
                        block_number,
                        block_hash,
                        fee,
                    });
                }
                Some(TxStatus::Failed) => {
                    return Err(anyhow::anyhow!("transaction {tx_id} failed on-chain"));
                }
                Some(TxStatus::Pending) | None => {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("{}/rpc", self.url.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmedTransfer {
    pub tx_hash:      H256,
    pub block_number: u64,
    pub block_hash:   H256,
    pub fee:          U256,
}
