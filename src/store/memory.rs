//! In-memory payment store
//!
//! A single mutex covers payments and the ledger, which makes every write
//! atomic. Used in tests and for local runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PaymentStore, StoreError, StoreResult};
use crate::domain::{IdempotencyKey, PaymentRequest, PaymentStatus};
use crate::ledger::{AuditDraft, AuditEntry, GENESIS_HASH};

#[derive(Debug, Default)]
struct Inner {
    payments: HashMap<Uuid, PaymentRequest>,
    by_key: HashMap<IdempotencyKey, Uuid>,
    audit: Vec<AuditEntry>,
    payment_sequences: HashMap<Uuid, i64>,
}

impl Inner {
    fn append(&mut self, draft: AuditDraft) -> AuditEntry {
        let sequence = self.audit.len() as i64 + 1;
        let previous_hash = self
            .audit
            .last()
            .map(|e| e.entry_hash().to_string())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let payment_sequence = self
            .payment_sequences
            .entry(draft.payment_id())
            .and_modify(|s| *s += 1)
            .or_insert(1);

        let entry = draft.seal(sequence, *payment_sequence, &previous_hash, Utc::now());
        self.audit.push(entry.clone());
        entry
    }
}

/// Payments and audit entries held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit entries in the ledger
    pub async fn audit_len(&self) -> usize {
        self.inner.lock().await.audit.len()
    }

    #[cfg(test)]
    pub(crate) async fn tamper_with(&self, sequence: i64, f: impl FnOnce(&mut AuditEntry)) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.audit.get_mut((sequence - 1) as usize) {
            f(entry);
        }
    }

    #[cfg(test)]
    pub(crate) async fn tamper_payment(&self, payment_id: Uuid, f: impl FnOnce(&mut PaymentRequest)) {
        let mut inner = self.inner.lock().await;
        if let Some(payment) = inner.payments.get_mut(&payment_id) {
            f(payment);
        }
    }

    #[cfg(test)]
    pub(crate) async fn remove_entry(&self, sequence: i64) {
        let mut inner = self.inner.lock().await;
        inner.audit.remove((sequence - 1) as usize);
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: &PaymentRequest, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let mut inner = self.inner.lock().await;

        if inner.by_key.contains_key(&payment.idempotency_key) {
            return Err(StoreError::DuplicateIdempotencyKey(
                payment.idempotency_key.to_string(),
            ));
        }

        inner
            .by_key
            .insert(payment.idempotency_key.clone(), payment.id);
        inner.payments.insert(payment.id, payment.clone());
        Ok(inner.append(audit))
    }

    async fn commit_transition(
        &self,
        expected: PaymentStatus,
        payment: &PaymentRequest,
        audit: AuditDraft,
    ) -> StoreResult<AuditEntry> {
        let mut inner = self.inner.lock().await;

        let current = inner
            .payments
            .get(&payment.id)
            .ok_or(StoreError::NotFound(payment.id))?;

        if current.status != expected {
            return Err(StoreError::StatusConflict {
                payment_id: payment.id,
                expected,
                actual: current.status,
            });
        }

        inner.payments.insert(payment.id, payment.clone());
        Ok(inner.append(audit))
    }

    async fn append_audit(&self, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let mut inner = self.inner.lock().await;
        if !inner.payments.contains_key(&audit.payment_id()) {
            return Err(StoreError::NotFound(audit.payment_id()));
        }
        Ok(inner.append(audit))
    }

    async fn get(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRequest>> {
        Ok(self.inner.lock().await.payments.get(&payment_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<PaymentRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_key
            .get(key)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn find_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRequest>> {
        let inner = self.inner.lock().await;
        let mut payments: Vec<PaymentRequest> = inner
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        payments.truncate(limit.max(0) as usize);
        Ok(payments)
    }

    async fn audit_trail(&self, payment_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|e| e.payment_id() == payment_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.payment_sequence());
        Ok(entries)
    }

    async fn audit_range(&self, after_sequence: i64, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|e| e.sequence() > after_sequence)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
