//! Audit Ledger
//!
//! Append-only, hash-chained record of every decision taken on a payment.
//! Each entry hashes its own content together with the hash of the entry
//! before it, so editing or removing any stored entry breaks the chain.
//! Entries are verified every time they are read, including their links to
//! the neighbouring entries of the global chain.

pub mod entry;

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::PaymentError;
use crate::store::{PaymentStore, StoreError};

pub use entry::{AuditAction, AuditDraft, AuditEntry, GENESIS_HASH};

/// Batch size when walking the global chain
const VERIFY_BATCH: i64 = 500;

/// Result of hash chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_sequence: Option<i64>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

impl ChainVerificationResult {
    fn valid(entries_checked: u64) -> Self {
        Self {
            is_valid: true,
            entries_checked,
            first_invalid_sequence: None,
            expected_hash: None,
            actual_hash: None,
        }
    }

    fn broken(entries_checked: u64, sequence: i64, expected: String, actual: String) -> Self {
        Self {
            is_valid: false,
            entries_checked,
            first_invalid_sequence: Some(sequence),
            expected_hash: Some(expected),
            actual_hash: Some(actual),
        }
    }
}

/// Read and append access to the audit trail.
#[derive(Debug, Clone)]
pub struct AuditLedger {
    store: Arc<dyn PaymentStore>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Append an entry that records a decision without a status change.
    pub async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, PaymentError> {
        let payment_id = draft.payment_id();
        let entry = self.store.append_audit(draft).await.map_err(|e| match e {
            StoreError::NotFound(id) => PaymentError::PaymentNotFound(id),
            other => PaymentError::Storage(other.to_string()),
        })?;

        tracing::debug!(
            payment_id = %payment_id,
            sequence = entry.sequence(),
            action = %entry.action(),
            "Audit entry appended"
        );

        Ok(entry)
    }

    /// Entries of one payment in order, verified before they are returned.
    pub async fn read(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>, PaymentError> {
        let entries = self
            .store
            .audit_trail(payment_id)
            .await
            .map_err(|e| PaymentError::Storage(e.to_string()))?;

        let verified = match verify_trail(payment_id, &entries) {
            Ok(()) => self.verify_links(payment_id, &entries).await,
            Err(e) => Err(e),
        };
        verified.inspect_err(|e| {
            tracing::error!(payment_id = %payment_id, error = %e, "Audit trail failed verification");
        })?;

        Ok(entries)
    }

    /// Check each entry against its global predecessor and successor.
    ///
    /// An entry rewritten with recomputed hashes still verifies on its own;
    /// its neighbours no longer point at it.
    async fn verify_links(
        &self,
        payment_id: Uuid,
        entries: &[AuditEntry],
    ) -> Result<(), PaymentError> {
        for entry in entries {
            let sequence = entry.sequence();
            let window = self
                .store
                .audit_range((sequence - 2).max(0), 3)
                .await
                .map_err(|e| PaymentError::Storage(e.to_string()))?;
            let neighbour = |s: i64| window.iter().find(|e| e.sequence() == s);

            let expected_previous = if sequence == 1 {
                GENESIS_HASH
            } else {
                match neighbour(sequence - 1) {
                    Some(previous) => previous.entry_hash(),
                    None => {
                        return Err(PaymentError::integrity(
                            Some(payment_id),
                            format!("entry {sequence} has no predecessor"),
                        ))
                    }
                }
            };
            if entry.previous_hash() != expected_previous {
                return Err(PaymentError::integrity(
                    Some(payment_id),
                    format!("entry {sequence} does not link to its predecessor"),
                ));
            }

            if let Some(next) = neighbour(sequence + 1) {
                if next.previous_hash() != entry.entry_hash() {
                    return Err(PaymentError::integrity(
                        Some(payment_id),
                        format!("entry {} does not link to entry {sequence}", next.sequence()),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Walk the whole ledger and report the first broken link, if any.
    pub async fn verify_chain(&self) -> Result<ChainVerificationResult, PaymentError> {
        let mut previous_hash = GENESIS_HASH.to_string();
        let mut expected_sequence = 1;
        let mut checked = 0u64;

        loop {
            let batch = self
                .store
                .audit_range(expected_sequence - 1, VERIFY_BATCH)
                .await
                .map_err(|e| PaymentError::Storage(e.to_string()))?;

            if batch.is_empty() {
                break;
            }

            for entry in &batch {
                if entry.sequence() != expected_sequence {
                    return Ok(ChainVerificationResult::broken(
                        checked,
                        expected_sequence,
                        format!("sequence {expected_sequence}"),
                        format!("sequence {}", entry.sequence()),
                    ));
                }

                if entry.previous_hash() != previous_hash {
                    return Ok(ChainVerificationResult::broken(
                        checked,
                        entry.sequence(),
                        previous_hash,
                        entry.previous_hash().to_string(),
                    ));
                }

                if !entry.verify_hashes() {
                    return Ok(ChainVerificationResult::broken(
                        checked,
                        entry.sequence(),
                        entry.compute_hash(),
                        entry.entry_hash().to_string(),
                    ));
                }

                previous_hash = entry.entry_hash().to_string();
                expected_sequence += 1;
                checked += 1;
            }
        }

        Ok(ChainVerificationResult::valid(checked))
    }
}

/// Per-payment checks: contiguous sequence from 1 and intact hashes.
fn verify_trail(payment_id: Uuid, entries: &[AuditEntry]) -> Result<(), PaymentError> {
    for (index, entry) in entries.iter().enumerate() {
        let expected = index as i64 + 1;
        if entry.payment_sequence() != expected {
            return Err(PaymentError::integrity(
                Some(payment_id),
                format!(
                    "expected payment sequence {expected}, found {}",
                    entry.payment_sequence()
                ),
            ));
        }

        if entry.payment_id() != payment_id {
            return Err(PaymentError::integrity(
                Some(payment_id),
                format!("entry {} belongs to another payment", entry.sequence()),
            ));
        }

        if !entry.verify_hashes() {
            return Err(PaymentError::integrity(
                Some(payment_id),
                format!("hash mismatch at sequence {}", entry.sequence()),
            ));
        }
    }

    Ok(())
}
