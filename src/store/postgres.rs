//! Postgres payment store
//!
//! Payment records are kept as JSONB next to the indexed columns the
//! pipeline queries on. Audit entries live in `audit_entries`, which a
//! trigger makes append-only. Appends take a transaction-scoped advisory
//! lock so the chain tail is read and extended by one writer at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{PaymentStore, StoreError, StoreResult};
use crate::domain::{IdempotencyKey, PaymentRequest, PaymentStatus};
use crate::ledger::entry::StoredEntry;
use crate::ledger::{AuditDraft, AuditEntry, GENESIS_HASH};

/// Advisory lock key guarding the audit chain tail
const AUDIT_CHAIN_LOCK: i64 = 0x7472_6561_7375_7279;

type AuditRow = (
    i64,
    i64,
    Uuid,
    String,
    String,
    Option<String>,
    String,
    DateTime<Utc>,
    Option<Uuid>,
    serde_json::Value,
    String,
    String,
    String,
);

const AUDIT_COLUMNS: &str = "sequence, payment_sequence, payment_id, actor, action, prior_status, \
     new_status, recorded_at, correlation_id, detail, payload_hash, previous_hash, entry_hash";

fn entry_from_row(row: AuditRow) -> StoreResult<AuditEntry> {
    let (
        sequence,
        payment_sequence,
        payment_id,
        actor,
        action,
        prior_status,
        new_status,
        recorded_at,
        correlation_id,
        detail,
        payload_hash,
        previous_hash,
        entry_hash,
    ) = row;

    let prior_status = prior_status
        .map(|s| s.parse::<PaymentStatus>())
        .transpose()
        .map_err(StoreError::Corrupt)?;

    Ok(AuditEntry::restore(StoredEntry {
        sequence,
        payment_sequence,
        payment_id,
        actor,
        action: action.parse().map_err(StoreError::Corrupt)?,
        prior_status,
        new_status: new_status.parse().map_err(StoreError::Corrupt)?,
        recorded_at,
        correlation_id,
        detail,
        payload_hash,
        previous_hash,
        entry_hash,
    }))
}

/// Postgres-backed [`PaymentStore`].
#[derive(Debug, Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seal and insert an entry inside `tx`.
    async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        draft: AuditDraft,
    ) -> StoreResult<AuditEntry> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(AUDIT_CHAIN_LOCK)
            .execute(&mut **tx)
            .await?;

        let tail: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT sequence, entry_hash FROM audit_entries
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut **tx)
        .await?;

        let (sequence, previous_hash) = match tail {
            Some((sequence, hash)) => (sequence + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let payment_sequence: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(payment_sequence), 0) + 1
            FROM audit_entries
            WHERE payment_id = $1
            "#,
        )
        .bind(draft.payment_id())
        .fetch_one(&mut **tx)
        .await?;

        let entry = draft.seal(sequence, payment_sequence, &previous_hash, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                sequence, payment_sequence, payment_id, actor, action,
                prior_status, new_status, recorded_at, correlation_id,
                detail, payload_hash, previous_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.sequence())
        .bind(entry.payment_sequence())
        .bind(entry.payment_id())
        .bind(entry.actor().as_str())
        .bind(entry.action().as_str())
        .bind(entry.prior_status().map(|s| s.as_str()))
        .bind(entry.new_status().as_str())
        .bind(entry.recorded_at())
        .bind(entry.correlation_id())
        .bind(entry.detail())
        .bind(entry.payload_hash())
        .bind(entry.previous_hash())
        .bind(entry.entry_hash())
        .execute(&mut **tx)
        .await?;

        Ok(entry)
    }

    async fn current_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
    ) -> StoreResult<PaymentStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
                .bind(payment_id)
                .fetch_optional(&mut **tx)
                .await?;

        status
            .ok_or(StoreError::NotFound(payment_id))?
            .parse()
            .map_err(StoreError::Corrupt)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create(&self, payment: &PaymentRequest, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let record = serde_json::to_value(payment)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (
                id, idempotency_key, status, debit_account_id, record, created_at, modified_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id)
        .bind(payment.idempotency_key.as_str())
        .bind(payment.status.as_str())
        .bind(payment.debit_account_id())
        .bind(&record)
        .bind(payment.created_at)
        .bind(payment.modified_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StoreError::DuplicateIdempotencyKey(
                    payment.idempotency_key.to_string(),
                ));
            }
            return Err(e.into());
        }

        let entry = self.append_in_tx(&mut tx, audit).await?;
        tx.commit().await?;

        Ok(entry)
    }

    async fn commit_transition(
        &self,
        expected: PaymentStatus,
        payment: &PaymentRequest,
        audit: AuditDraft,
    ) -> StoreResult<AuditEntry> {
        let record = serde_json::to_value(payment)?;
        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE payments
            SET status = $3, record = $4, modified_at = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(payment.id)
        .bind(expected.as_str())
        .bind(payment.status.as_str())
        .bind(&record)
        .bind(payment.modified_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let actual = self.current_status(&mut tx, payment.id).await?;
            return Err(StoreError::StatusConflict {
                payment_id: payment.id,
                expected,
                actual,
            });
        }

        let entry = self.append_in_tx(&mut tx, audit).await?;
        tx.commit().await?;

        Ok(entry)
    }

    async fn append_audit(&self, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let mut tx = self.pool.begin().await?;
        self.current_status(&mut tx, audit.payment_id()).await?;
        let entry = self.append_in_tx(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn get(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRequest>> {
        let record: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT record FROM payments WHERE id = $1")
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record.map(serde_json::from_value).transpose()?)
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<PaymentRequest>> {
        let record: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT record FROM payments WHERE idempotency_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(record.map(serde_json::from_value).transpose()?)
    }

    async fn find_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRequest>> {
        let records: Vec<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT record FROM payments
            WHERE status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records
            .into_iter()
            .map(|r| serde_json::from_value(r).map_err(StoreError::from))
            .collect()
    }

    async fn audit_trail(&self, payment_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE payment_id = $1 ORDER BY payment_sequence ASC"
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn audit_range(&self, after_sequence: i64, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE sequence > $1 ORDER BY sequence ASC LIMIT $2"
        ))
        .bind(after_sequence)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}
