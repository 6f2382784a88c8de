use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a single payment obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Waiting in the awaiting set to be coalesced into a batch.
    Awaiting,
    /// Included in a batch transfer that has been submitted but not yet
    /// confirmed on-chain.
    Sent,
    /// Confirmed by the smart-contract interface.
    Confirmed,
    /// Still awaiting, but past its payment deadline.
    Overdue,
}

impl PaymentStatus {
    #[must_use]
    pub fn is_awaiting(self) -> bool {
        matches!(self, Self::Awaiting | Self::Overdue)
    }
}

impl From<PaymentStatus> for &'static str {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Awaiting => "awaiting",
            PaymentStatus::Sent => "sent",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Overdue => "overdue",
        }
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "awaiting" => Ok(Self::Awaiting),
            "sent" => Ok(Self::Sent),
            "confirmed" => Ok(Self::Confirmed),
            "overdue" => Ok(Self::Overdue),
            other => Err(anyhow::anyhow!("unknown payment status {other}")),
        }
    }
}

/// Raw row as stored in the `payments` table.
///
/// Amounts are stored as `NUMERIC(78,0)` decimal strings (Postgres hands them
/// back as text via `::text` casts in the queries) so values round-trip
/// exactly with no floating point involved; `Payment` below parses them into
/// `U256`.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id:           i64,
    pub subtask_id:   String,
    pub payee:        Vec<u8>,
    pub value:        String,
    pub processed_ts: DateTime<Utc>,
    pub status:       String,
    pub tx_hash:      Option<Vec<u8>>,
    pub block_number: Option<i64>,
    pub block_hash:   Option<Vec<u8>>,
    pub fee:          Option<String>,
    pub created_ts:   DateTime<Utc>,
    pub modified_ts:  DateTime<Utc>,
}

/// A single payment obligation, in application-facing form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id:           i64,
    pub subtask_id:   String,
    pub payee:        Address,
    pub value:        U256,
    pub processed_ts: DateTime<Utc>,
    pub status:       PaymentStatus,
    pub details:      PaymentDetails,
    pub created_ts:   DateTime<Utc>,
    pub modified_ts:  DateTime<Utc>,
}

/// On-chain details that only exist once a payment has been sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentDetails {
    pub tx_hash:      Option<H256>,
    pub block_number: Option<u64>,
    pub block_hash:   Option<H256>,
    pub fee:          Option<U256>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = anyhow::Error;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:           row.id,
            subtask_id:   row.subtask_id,
            payee:        Address::from_slice(&row.payee),
            value:        U256::from_dec_str(&row.value)?,
            processed_ts: row.processed_ts,
            status:       PaymentStatus::try_from(row.status.as_str())?,
            details:      PaymentDetails {
                tx_hash:      row.tx_hash.map(|b| H256::from_slice(&b)),
                block_number: row.block_number.map(|n| n as u64),
                block_hash:   row.block_hash.map(|b| H256::from_slice(&b)),
                fee:          row.fee.map(|f| U256::from_dec_str(&f)).transpose()?,
            },
            created_ts:   row.created_ts,
            modified_ts:  row.modified_ts,
        })
    }
}
