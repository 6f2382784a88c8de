use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use sqlx::{Acquire, Postgres};
use tracing::instrument;

use super::types::{Payment, PaymentRow};
use super::Error;

const SELECT_COLUMNS: &str = r#"
    id, subtask_id, payee, value::text AS value, processed_ts, status,
    tx_hash, block_number, block_hash, fee::text AS fee, created_ts, modified_ts
"#;

/// Payment-record persistence, following the same pattern as the rest of the
/// storage layer: every method acquires a connection from whatever it's
/// called on (a pool, a transaction, ...) so callers can compose several of
/// these into one atomic transaction when needed.
#[async_trait::async_trait]
pub trait DbMethods<'c>: Acquire<'c, Database = Postgres> + Sized {
    /// Inserts a new payment obligation into the awaiting set.
    ///
    /// Returns [`Error::DuplicateSubtask`] if a payment for this subtask id
    /// has already been recorded, enforcing enqueue idempotency by id.
    #[instrument(skip(self), level = "debug")]
    async fn insert_payment(
        self,
        subtask_id: &str,
        payee: Address,
        value: U256,
        processed_ts: DateTime<Utc>,
    ) -> Result<Payment, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (subtask_id, payee, value, processed_ts, status, created_ts, modified_ts)
            VALUES ($1, $2, $3, $4, 'awaiting', now(), now())
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(subtask_id)
        .bind(payee.as_bytes())
        .bind(value.to_string())
        .bind(processed_ts)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::DuplicateSubtask
            }
            _ => Error::Sqlx(err),
        })?;

        Ok(row.try_into()?)
    }

    /// Loads every payment currently in the awaiting set (`awaiting` or
    /// `overdue`), ordered by closure time and then by insertion order, so
    /// the batch selector can apply the closure-time cutoff deterministically
    /// and break ties in FIFO order.
    #[instrument(skip(self), level = "debug")]
    async fn get_awaiting_payments(self) -> Result<Vec<Payment>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM payments
            WHERE status IN ('awaiting', 'overdue')
            ORDER BY processed_ts ASC, id ASC
            "#
        ))
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(Payment::try_from)
            .collect::<Result<_, _>>()
            .map_err(Error::Other)
    }

    /// Loads every payment currently sitting in `sent`, across every
    /// in-flight tx hash. Used at startup to rebuild the sent-batch
    /// registry and re-register confirmation polling for each one.
    #[instrument(skip(self), level = "debug")]
    async fn get_sent_payments(self) -> Result<Vec<Payment>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM payments
            WHERE status = 'sent'
            ORDER BY tx_hash, id ASC
            "#
        ))
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(Payment::try_from)
            .collect::<Result<_, _>>()
            .map_err(Error::Other)
    }

    /// Atomically transitions the given payments from `awaiting`/`overdue`
    /// to `sent`, tagging them with the tx hash of the batch transfer that
    /// carries them. Call within the same transaction as the submission
    /// call so a submission failure can be rolled back wholesale.
    #[instrument(skip(self, ids), level = "debug")]
    async fn mark_sent(self, ids: &[i64], tx_hash: H256) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE payments
            SET    status = 'sent', tx_hash = $1, modified_ts = now()
            WHERE  id = ANY($2) AND status IN ('awaiting', 'overdue')
            "#,
        )
        .bind(tx_hash.as_bytes())
        .bind(ids)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Reverts every payment sent under `tx_hash` back to `awaiting`.
    ///
    /// Used when batch submission itself fails (not a failed receipt): the
    /// payments never left the awaiting set in the first place, from the
    /// caller's point of view.
    #[instrument(skip(self), level = "debug")]
    async fn mark_awaiting(self, tx_hash: H256) -> Result<u64, Error> {
        let mut conn = self.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET    status = 'awaiting', tx_hash = NULL, modified_ts = now()
            WHERE  tx_hash = $1 AND status = 'sent'
            "#,
        )
        .bind(tx_hash.as_bytes())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Marks every payment sent under `tx_hash` as confirmed, recording the
    /// block it landed in and the fee paid.
    #[instrument(skip(self), level = "debug")]
    async fn mark_confirmed(
        self,
        tx_hash: H256,
        block_number: u64,
        block_hash: H256,
        fee: U256,
    ) -> Result<u64, Error> {
        let mut conn = self.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET    status = 'confirmed', block_number = $2, block_hash = $3,
                   fee = $4, modified_ts = now()
            WHERE  tx_hash = $1 AND status = 'sent'
            "#,
        )
        .bind(tx_hash.as_bytes())
        .bind(block_number as i64)
        .bind(block_hash.as_bytes())
        .bind(fee.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Moves every `awaiting` payment whose closure time is before
    /// `deadline_before` to `overdue`.
    ///
    /// Only ever touches rows currently in `awaiting`: already-`overdue`
    /// payments are left alone (no-op, not re-marked), and `sent`/`confirmed`
    /// payments are never matched by the `awaiting` filter.
    #[instrument(skip(self), level = "debug")]
    async fn mark_overdue(self, deadline_before: DateTime<Utc>) -> Result<u64, Error> {
        let mut conn = self.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET    status = 'overdue', modified_ts = now()
            WHERE  status = 'awaiting' AND processed_ts < $1
            "#,
        )
        .bind(deadline_before)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

impl<'c, T> DbMethods<'c> for T where T: Acquire<'c, Database = Postgres> + Send + Sync + Sized {}
