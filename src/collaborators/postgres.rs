//! Postgres-backed account store and period calendar

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{AccountStore, CollaboratorError, DebitOutcome, PeriodLockCalendar};
use crate::domain::{AccountSnapshot, Currency, DebitRecord};

type AccountRow = (Uuid, String, Decimal, Decimal, Decimal, i64);

type DebitRow = (Uuid, Uuid, Decimal, Decimal, i64, DateTime<Utc>);

fn debit_from_row(row: DebitRow) -> DebitRecord {
    let (account_id, payment_id, amount, balance_after, version_after, applied_at) = row;
    DebitRecord {
        account_id,
        payment_id,
        amount,
        balance_after,
        version_after,
        applied_at,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn snapshot_from_row(row: AccountRow) -> Result<AccountSnapshot, CollaboratorError> {
    let (id, currency, balance, overdraft_limit, held, version) = row;
    let currency = Currency::new(&currency)
        .map_err(|e| CollaboratorError::Unavailable(format!("account {id}: {e}")))?;

    Ok(AccountSnapshot {
        id,
        currency,
        balance,
        overdraft_limit,
        held,
        version,
    })
}

/// Accounts table with a version column for optimistic debits.
///
/// Every debit also writes an `account_debits` row keyed by
/// (account, payment) in the same transaction, so a payment cannot be
/// debited twice.
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn snapshot(&self, account_id: Uuid) -> Result<AccountSnapshot, CollaboratorError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, currency, balance, overdraft_limit, held, version
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(snapshot_from_row)
            .transpose()?
            .ok_or(CollaboratorError::AccountNotFound(account_id))
    }

    async fn debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        expected_version: i64,
    ) -> Result<DebitOutcome, CollaboratorError> {
        if let Some(record) = self.applied_debit(account_id, payment_id).await? {
            return Ok(DebitOutcome::AlreadyApplied(record));
        }

        let mut tx = self.pool.begin().await?;

        let updated: Option<AccountRow> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET balance = balance - $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $3
            RETURNING id, currency, balance, overdraft_limit, held, version
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            tx.rollback().await?;
            // Either the version moved or the account is gone
            let current = self.snapshot(account_id).await?;
            return Ok(DebitOutcome::Conflict {
                current_version: current.version,
            });
        };
        let after = snapshot_from_row(row)?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO account_debits (
                account_id, payment_id, amount, balance_after, version_after, applied_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(account_id)
        .bind(payment_id)
        .bind(amount)
        .bind(after.balance)
        .bind(after.version)
        .execute(&mut *tx)
        .await;

        match recorded {
            Ok(_) => {
                tx.commit().await?;
                Ok(DebitOutcome::Applied(after))
            }
            // Another process debited this payment first
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                self.applied_debit(account_id, payment_id)
                    .await?
                    .map(DebitOutcome::AlreadyApplied)
                    .ok_or_else(|| {
                        CollaboratorError::Unavailable(format!(
                            "debit of payment {payment_id} reported but not found"
                        ))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn applied_debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<DebitRecord>, CollaboratorError> {
        let row: Option<DebitRow> = sqlx::query_as(
            r#"
            SELECT account_id, payment_id, amount, balance_after, version_after, applied_at
            FROM account_debits
            WHERE account_id = $1 AND payment_id = $2
            "#,
        )
        .bind(account_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(debit_from_row))
    }
}

/// Period locks keyed by (year, month); missing rows are open periods.
#[derive(Debug, Clone)]
pub struct PgPeriodLockCalendar {
    pool: PgPool,
}

impl PgPeriodLockCalendar {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeriodLockCalendar for PgPeriodLockCalendar {
    async fn is_locked(&self, value_date: NaiveDate) -> Result<bool, CollaboratorError> {
        let locked: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT locked FROM period_locks
            WHERE year = $1 AND month = $2
            "#,
        )
        .bind(value_date.year())
        .bind(value_date.month() as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(locked.unwrap_or(false))
    }
}
