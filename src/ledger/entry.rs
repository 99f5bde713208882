//! Audit entries and their hashes

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{ActorId, OperationContext, PaymentStatus};
use crate::domain::payment::sha256_hex;

/// `previous_hash` of the first entry in the ledger
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Submitted,
    Validated,
    ValidationFailed,
    Screened,
    SanctionsHold,
    SanctionsOverride,
    Rescreened,
    QueuedForApproval,
    Approved,
    SelfApprovalAttempt,
    AuthorizationDenied,
    SignatureRejected,
    ExecutionConflict,
    Executed,
    ExecutionFailed,
    Cancelled,
    Expired,
    Exported,
    ExportRefused,
    TransitionRefused,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Submitted => "payment.submitted",
            AuditAction::Validated => "payment.validated",
            AuditAction::ValidationFailed => "payment.validation_failed",
            AuditAction::Screened => "payment.screened",
            AuditAction::SanctionsHold => "sanctions.hold",
            AuditAction::SanctionsOverride => "sanctions.override",
            AuditAction::Rescreened => "sanctions.rescreened",
            AuditAction::QueuedForApproval => "approval.queued",
            AuditAction::Approved => "approval.approved",
            AuditAction::SelfApprovalAttempt => "approval.self_approval_attempt",
            AuditAction::AuthorizationDenied => "auth.permission_denied",
            AuditAction::SignatureRejected => "execution.signature_rejected",
            AuditAction::ExecutionConflict => "execution.conflict",
            AuditAction::Executed => "execution.executed",
            AuditAction::ExecutionFailed => "execution.failed",
            AuditAction::Cancelled => "payment.cancelled",
            AuditAction::Expired => "payment.expired",
            AuditAction::Exported => "export.generated",
            AuditAction::ExportRefused => "export.refused",
            AuditAction::TransitionRefused => "payment.transition_refused",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_ACTIONS
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown audit action: {s}"))
    }
}

const ALL_ACTIONS: [AuditAction; 20] = [
    AuditAction::Submitted,
    AuditAction::Validated,
    AuditAction::ValidationFailed,
    AuditAction::Screened,
    AuditAction::SanctionsHold,
    AuditAction::SanctionsOverride,
    AuditAction::Rescreened,
    AuditAction::QueuedForApproval,
    AuditAction::Approved,
    AuditAction::SelfApprovalAttempt,
    AuditAction::AuthorizationDenied,
    AuditAction::SignatureRejected,
    AuditAction::ExecutionConflict,
    AuditAction::Executed,
    AuditAction::ExecutionFailed,
    AuditAction::Cancelled,
    AuditAction::Expired,
    AuditAction::Exported,
    AuditAction::ExportRefused,
    AuditAction::TransitionRefused,
];

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry content before the ledger assigns its position and hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub(crate) payment_id: Uuid,
    pub(crate) actor: ActorId,
    pub(crate) action: AuditAction,
    pub(crate) prior_status: Option<PaymentStatus>,
    pub(crate) new_status: PaymentStatus,
    pub(crate) correlation_id: Option<Uuid>,
    pub(crate) detail: serde_json::Value,
}

impl AuditDraft {
    /// Entry that leaves the status where it is
    pub fn new(
        action: AuditAction,
        payment_id: Uuid,
        status: PaymentStatus,
        context: &OperationContext,
    ) -> Self {
        Self {
            payment_id,
            actor: context.actor.clone(),
            action,
            prior_status: Some(status),
            new_status: status,
            correlation_id: context.correlation_id,
            detail: serde_json::Value::Null,
        }
    }

    /// Entry recording a status change
    pub fn transition(
        action: AuditAction,
        payment_id: Uuid,
        prior_status: Option<PaymentStatus>,
        new_status: PaymentStatus,
        context: &OperationContext,
    ) -> Self {
        Self {
            prior_status,
            new_status,
            ..Self::new(action, payment_id, new_status, context)
        }
    }

    /// Attach structured detail
    pub fn detail<T: Serialize>(mut self, detail: &T) -> Self {
        self.detail = serde_json::to_value(detail).unwrap_or(serde_json::Value::Null);
        self
    }

    pub fn payment_id(&self) -> Uuid {
        self.payment_id
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    /// Fix the entry at its ledger position.
    pub(crate) fn seal(
        self,
        sequence: i64,
        payment_sequence: i64,
        previous_hash: &str,
        recorded_at: DateTime<Utc>,
    ) -> AuditEntry {
        let mut entry = AuditEntry {
            sequence,
            payment_sequence,
            payment_id: self.payment_id,
            actor: self.actor,
            action: self.action,
            prior_status: self.prior_status,
            new_status: self.new_status,
            recorded_at: recorded_at.trunc_subsecs(6),
            correlation_id: self.correlation_id,
            payload_hash: payload_hash(&self.detail),
            detail: self.detail,
            previous_hash: previous_hash.to_string(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }
}

/// A sealed, immutable audit record.
///
/// Only the ledger and the stores construct entries; everyone else reads
/// them through the accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    sequence: i64,
    payment_sequence: i64,
    payment_id: Uuid,
    actor: ActorId,
    action: AuditAction,
    prior_status: Option<PaymentStatus>,
    new_status: PaymentStatus,
    recorded_at: DateTime<Utc>,
    correlation_id: Option<Uuid>,
    detail: serde_json::Value,
    payload_hash: String,
    previous_hash: String,
    entry_hash: String,
}

/// Stored columns of an entry, as read back from persistence
pub(crate) struct StoredEntry {
    pub sequence: i64,
    pub payment_sequence: i64,
    pub payment_id: Uuid,
    pub actor: String,
    pub action: AuditAction,
    pub prior_status: Option<PaymentStatus>,
    pub new_status: PaymentStatus,
    pub recorded_at: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub payload_hash: String,
    pub previous_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Rebuild an entry from storage without recomputing anything
    pub(crate) fn restore(stored: StoredEntry) -> Self {
        Self {
            sequence: stored.sequence,
            payment_sequence: stored.payment_sequence,
            payment_id: stored.payment_id,
            actor: ActorId::new(stored.actor),
            action: stored.action,
            prior_status: stored.prior_status,
            new_status: stored.new_status,
            recorded_at: stored.recorded_at,
            correlation_id: stored.correlation_id,
            detail: stored.detail,
            payload_hash: stored.payload_hash,
            previous_hash: stored.previous_hash,
            entry_hash: stored.entry_hash,
        }
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn payment_sequence(&self) -> i64 {
        self.payment_sequence
    }

    pub fn payment_id(&self) -> Uuid {
        self.payment_id
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn prior_status(&self) -> Option<PaymentStatus> {
        self.prior_status
    }

    pub fn new_status(&self) -> PaymentStatus {
        self.new_status
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn detail(&self) -> &serde_json::Value {
        &self.detail
    }

    pub fn payload_hash(&self) -> &str {
        &self.payload_hash
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn entry_hash(&self) -> &str {
        &self.entry_hash
    }

    /// Whether this entry changed the payment status
    pub fn is_transition(&self) -> bool {
        self.prior_status != Some(self.new_status)
    }

    /// Hash over every field except `entry_hash` itself
    pub(crate) fn compute_hash(&self) -> String {
        let hash_input = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.sequence,
            self.payment_id,
            self.payment_sequence,
            self.actor,
            self.action.as_str(),
            self.prior_status.map(|s| s.as_str()).unwrap_or(""),
            self.new_status.as_str(),
            self.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.correlation_id.map(|c| c.to_string()).unwrap_or_default(),
            self.payload_hash,
            self.previous_hash,
        );
        sha256_hex(hash_input.as_bytes())
    }

    /// Stored hashes match the content
    pub fn verify_hashes(&self) -> bool {
        payload_hash(&self.detail) == self.payload_hash && self.compute_hash() == self.entry_hash
    }

    #[cfg(test)]
    pub(crate) fn tamper_detail(&mut self, detail: serde_json::Value) {
        self.detail = detail;
    }

    /// Replace the detail and reseal, keeping `previous_hash`
    #[cfg(test)]
    pub(crate) fn rewrite_detail(&mut self, detail: serde_json::Value) {
        self.payload_hash = payload_hash(&detail);
        self.detail = detail;
        self.entry_hash = self.compute_hash();
    }
}

/// SHA-256 of the detail's canonical JSON text
fn payload_hash(detail: &serde_json::Value) -> String {
    sha256_hex(detail.to_string().as_bytes())
}
