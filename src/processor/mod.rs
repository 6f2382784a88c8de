use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use ethers::types::{Address, H256, U256};
use sqlx::Acquire;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument};

use crate::config::ProcessorConfig;
use crate::converter::Converter;
use crate::database::methods::DbMethods;
use crate::database::types::{Payment, PaymentDetails, PaymentStatus};
use crate::database::Database;
use crate::monitoring::Monitoring;
use crate::sci::{ReceiptStatus, SmartContractInterface, TransactionReceipt};

pub mod error;
pub mod selector;

pub use error::ProcessorError;
use selector::{clip_to_resources, eligible_prefix, ResourceLimits};

const CONFIRMATION_CHANNEL_CAPACITY: usize = 64;

struct State {
    /// Ordered ascending by `processed_ts`; the order a batch must be sent in.
    awaiting:      Vec<Payment>,
    sent_registry: HashMap<H256, Vec<Payment>>,
}

/// Coalesces outbound micropayment obligations into batch transfers,
/// reconciles their confirmation, and tracks which ones have gone overdue.
///
/// Every mutating operation serializes on a single mutex wrapping the
/// in-memory awaiting set and sent-batch registry; `add` and `sendout` are
/// mutually exclusive, and the confirmation worker hands its work off
/// through `confirmation_sender` rather than mutating state inline from
/// whatever task is driving SCI polling.
pub struct Processor {
    config:               ProcessorConfig,
    database:             Arc<Database>,
    sci:                  Arc<dyn SmartContractInterface>,
    converter:            Arc<dyn Converter>,
    state:                Mutex<State>,
    confirmation_sender:  mpsc::Sender<TransactionReceipt>,
}

impl Processor {
    #[must_use]
    pub fn new(
        config: ProcessorConfig,
        database: Arc<Database>,
        sci: Arc<dyn SmartContractInterface>,
        converter: Arc<dyn Converter>,
    ) -> (Arc<Self>, mpsc::Receiver<TransactionReceipt>) {
        let (confirmation_sender, confirmation_receiver) = mpsc::channel(CONFIRMATION_CHANNEL_CAPACITY);

        let processor = Arc::new(Self {
            config,
            database,
            sci,
            converter,
            state: Mutex::new(State {
                awaiting:      Vec::new(),
                sent_registry: HashMap::new(),
            }),
            confirmation_sender,
        });

        (processor, confirmation_receiver)
    }

    /// Rebuilds the awaiting set and sent-batch registry from the durable
    /// store, re-registering confirmation polling for every tx hash still
    /// outstanding from before a restart.
    #[instrument(skip(self))]
    pub async fn load_from_db(&self) -> Result<(), ProcessorError> {
        let mut state = self.state.lock().await;

        state.awaiting = self.database.get_awaiting_payments().await?;

        let sent = self.database.get_sent_payments().await?;
        let mut grouped: HashMap<H256, Vec<Payment>> = HashMap::new();
        for payment in sent {
            let tx_hash = payment.details.tx_hash.ok_or_else(|| {
                ProcessorError::StoreFailure(crate::database::Error::Other(anyhow::anyhow!(
                    "sent payment {} has no tx hash on record",
                    payment.id
                )))
            })?;
            grouped.entry(tx_hash).or_default().push(payment);
        }

        for tx_hash in grouped.keys().copied() {
            self.sci
                .on_transaction_confirmed(tx_hash, self.confirmation_sender.clone())
                .await;
        }

        let registered = grouped.len();
        state.sent_registry = grouped;

        info!(
            awaiting = state.awaiting.len(),
            in_flight_batches = registered,
            "reconciled processor state from the database"
        );

        Ok(())
    }

    /// Enqueues a new payment obligation. Fails with
    /// [`ProcessorError::DuplicateSubtask`] if `subtask_id` was already
    /// recorded.
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        subtask_id: &str,
        payee: Address,
        value: U256,
    ) -> Result<chrono::DateTime<Utc>, ProcessorError> {
        let processed_ts = Utc::now();

        let payment = match self
            .database
            .insert_payment(subtask_id, payee, value, processed_ts)
            .await
        {
            Ok(payment) => payment,
            Err(crate::database::Error::DuplicateSubtask) => return Err(ProcessorError::DuplicateSubtask),
            Err(err) => return Err(err.into()),
        };

        let mut state = self.state.lock().await;
        // New enqueues carry the wall clock's current timestamp, so as long
        // as the clock doesn't run backwards this keeps `awaiting` sorted
        // without a full re-sort on every insert.
        state.awaiting.push(payment);

        Ok(processed_ts)
    }

    /// Attempts to submit a batch transfer. Returns `true` iff one was
    /// actually sent. `closure_time_delay` of `Duration::ZERO` forces an
    /// immediate send of whatever is eligible right now; any other value
    /// (typically `PAYMENT_MAX_DELAY`) is the opportunistic mode, which only
    /// proceeds once the oldest awaiting payment has aged past it.
    #[instrument(skip(self))]
    pub async fn sendout(&self, closure_time_delay: StdDuration) -> Result<bool, ProcessorError> {
        let now = Utc::now();
        let delay = ChronoDuration::from_std(closure_time_delay)
            .unwrap_or_else(|_| ChronoDuration::zero());

        let mut state = self.state.lock().await;

        let eligible = eligible_prefix(&state.awaiting, now, delay);
        if eligible.is_empty() {
            return Ok(false);
        }

        if self
            .converter
            .is_converting()
            .await
            .map_err(ProcessorError::SubmissionFailure)?
        {
            info!("token conversion in flight, deferring sendout");
            return Ok(false);
        }

        let (token_balance, gas_asset_balance, gas_price, block) = tokio::try_join!(
            self.sci.get_token_balance(),
            self.sci.get_gas_asset_balance(),
            self.sci.get_current_gas_price(),
            self.sci.get_latest_confirmed_block(),
        )
        .map_err(ProcessorError::SubmissionFailure)?;

        let limits = ResourceLimits {
            token_balance,
            gas_asset_balance,
            gas_price,
            block_gas_limit:        block.gas_limit,
            gas_per_payment:        self.config.gas_per_payment,
            gas_batch_payment_base: self.config.gas_batch_payment_base,
            block_gas_limit_ratio:  self.config.block_gas_limit_ratio,
        };

        let batch: Vec<Payment> = clip_to_resources(eligible, &limits).to_vec();
        if batch.is_empty() {
            return Ok(false);
        }

        let ids: Vec<i64> = batch.iter().map(|p| p.id).collect();
        let transfers: Vec<(Address, U256)> = batch.iter().map(|p| (p.payee, p.value)).collect();
        let closure_time = batch.last().expect("checked non-empty above").processed_ts;
        let batch_size = batch.len();

        // Submission happens before any durable mutation: if the SCI call
        // fails, the awaiting set and store are left exactly as they were,
        // so a retried sendout reproduces an identical candidate batch.
        let tx_hash = self
            .sci
            .batch_transfer(&transfers, closure_time)
            .await
            .map_err(ProcessorError::SubmissionFailure)?;

        // `Database::new` runs at SERIALIZABLE isolation, so a concurrent
        // conflict surfaces as a commit-time error rather than a deadlock;
        // retry_tx! is what makes that survivable instead of a hard failure.
        crate::retry_tx!(self.database.pool, tx, { tx.mark_sent(&ids, tx_hash).await }).await?;

        let id_set: HashSet<i64> = ids.into_iter().collect();
        state.awaiting.retain(|p| !id_set.contains(&p.id));

        let sent_batch: Vec<Payment> = batch
            .into_iter()
            .map(|mut p| {
                p.status = PaymentStatus::Sent;
                p.details.tx_hash = Some(tx_hash);
                p
            })
            .collect();
        state.sent_registry.insert(tx_hash, sent_batch);

        drop(state);

        self.sci
            .on_transaction_confirmed(tx_hash, self.confirmation_sender.clone())
            .await;

        Monitoring::log_batch_size(batch_size);

        info!(?tx_hash, batch_size, %closure_time, "submitted batch transfer");

        Ok(true)
    }

    /// Promotes every `awaiting` payment past its deadline to `overdue`.
    #[instrument(skip(self))]
    pub async fn update_overdue(&self) -> Result<usize, ProcessorError> {
        let deadline = ChronoDuration::from_std(self.config.payment_deadline)
            .expect("payment_deadline fits in a chrono::Duration");
        let cutoff = Utc::now() - deadline;

        let affected = self.database.mark_overdue(cutoff).await?;

        let mut state = self.state.lock().await;
        for payment in &mut state.awaiting {
            if payment.status == PaymentStatus::Awaiting && payment.processed_ts < cutoff {
                payment.status = PaymentStatus::Overdue;
            }
        }

        if affected > 0 {
            info!(affected, "promoted awaiting payments to overdue");
        }

        Ok(affected as usize)
    }

    /// Drains confirmation receipts forever, reconciling each against the
    /// store and the in-memory sent-batch registry. Intended to run as a
    /// single long-lived supervised task.
    pub async fn run_confirmation_worker(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<TransactionReceipt>,
    ) -> anyhow::Result<()> {
        while let Some(receipt) = receiver.recv().await {
            if let Err(err) = self.handle_receipt(receipt).await {
                error!(?err, "failed to reconcile a confirmed transaction");
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn handle_receipt(&self, receipt: TransactionReceipt) -> Result<(), ProcessorError> {
        match receipt.status {
            ReceiptStatus::Success => {
                crate::retry_tx!(self.database.pool, tx, {
                    tx.mark_confirmed(receipt.tx_hash, receipt.block_number, receipt.block_hash, receipt.fee)
                        .await
                })
                .await?;

                self.state.lock().await.sent_registry.remove(&receipt.tx_hash);
            }
            ReceiptStatus::Failure => {
                crate::retry_tx!(self.database.pool, tx, { tx.mark_awaiting(receipt.tx_hash).await }).await?;

                let mut state = self.state.lock().await;
                if let Some(payments) = state.sent_registry.remove(&receipt.tx_hash) {
                    for mut payment in payments {
                        payment.status = PaymentStatus::Awaiting;
                        payment.details = PaymentDetails::default();
                        state.awaiting.push(payment);
                    }
                    state.awaiting.sort_by_key(|p| p.processed_ts);
                }
            }
        }

        Ok(())
    }

    /// Sum of the value of every payment not yet confirmed on-chain.
    pub async fn reserved_amount(&self) -> U256 {
        let state = self.state.lock().await;

        let awaiting_sum = state.awaiting.iter().fold(U256::zero(), |acc, p| acc + p.value);
        let sent_sum = state
            .sent_registry
            .values()
            .flatten()
            .fold(U256::zero(), |acc, p| acc + p.value);

        awaiting_sum + sent_sum
    }

    /// Number of distinct payments still in the awaiting set.
    pub async fn recipients_count(&self) -> usize {
        self.state.lock().await.awaiting.len()
    }
}
