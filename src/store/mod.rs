//! Payment Store
//!
//! Persistence for payment records and their audit entries. A status change
//! and its audit entry are written in one atomic operation; there is no way
//! to update or remove an audit entry once written.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{IdempotencyKey, PaymentRequest, PaymentStatus};
use crate::ledger::{AuditDraft, AuditEntry};

pub use memory::InMemoryPaymentStore;
pub use postgres::PgPaymentStore;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Idempotency key already used: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Payment {payment_id} is {actual}, expected {expected}")]
    StatusConflict {
        payment_id: Uuid,
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    #[error("Payment not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Repository for payments and the audit ledger.
#[async_trait]
pub trait PaymentStore: Send + Sync + fmt::Debug {
    /// Insert a new payment together with its first audit entry.
    ///
    /// Fails with `DuplicateIdempotencyKey` if the key is taken.
    async fn create(&self, payment: &PaymentRequest, audit: AuditDraft) -> StoreResult<AuditEntry>;

    /// Replace the payment record if its stored status is still `expected`,
    /// appending the audit entry in the same operation.
    async fn commit_transition(
        &self,
        expected: PaymentStatus,
        payment: &PaymentRequest,
        audit: AuditDraft,
    ) -> StoreResult<AuditEntry>;

    /// Append an entry that does not change the payment
    async fn append_audit(&self, audit: AuditDraft) -> StoreResult<AuditEntry>;

    async fn get(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRequest>>;

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<PaymentRequest>>;

    /// Payments in `status`, oldest first
    async fn find_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRequest>>;

    /// Audit entries of one payment ordered by payment sequence
    async fn audit_trail(&self, payment_id: Uuid) -> StoreResult<Vec<AuditEntry>>;

    /// Entries with global sequence greater than `after_sequence`, ascending
    async fn audit_range(&self, after_sequence: i64, limit: i64) -> StoreResult<Vec<AuditEntry>>;
}
