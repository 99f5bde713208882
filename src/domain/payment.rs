//! Payment Request
//!
//! Plain data model for a payment instruction moving through the approval
//! pipeline. Records are never mutated in place by callers: every change is
//! produced by [`PaymentRequest::transition`] and committed together with its
//! audit entry by the store.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::context::ActorId;
use super::sanctions::{SanctionsOverride, ScreeningResult};
use crate::signing::ApprovalSignature;

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Draft,
    Validated,
    Screened,
    PendingApproval,
    Approved,
    Executed,
    Rejected,
    Blocked,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Draft => "draft",
            PaymentStatus::Validated => "validated",
            PaymentStatus::Screened => "screened",
            PaymentStatus::PendingApproval => "pending_approval",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Executed => "executed",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Blocked => "blocked",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Whether `next` is reachable from this status in one step.
    ///
    /// `Blocked -> Screened` is only taken by the sanctions override action.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Draft, Validated)
                | (Draft, Rejected)
                | (Validated, Screened)
                | (Validated, Blocked)
                | (Validated, Rejected)
                | (Screened, PendingApproval)
                | (Screened, Rejected)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (Approved, Executed)
                | (Approved, Failed)
                | (Approved, Rejected)
                | (Blocked, Screened)
                | (Blocked, Rejected)
        )
    }

    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Executed | PaymentStatus::Rejected | PaymentStatus::Failed
        )
    }

    /// Cancellation is permitted from here
    pub fn is_cancellable(&self) -> bool {
        self.can_transition_to(PaymentStatus::Rejected)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => PaymentStatus::Draft,
            "validated" => PaymentStatus::Validated,
            "screened" => PaymentStatus::Screened,
            "pending_approval" => PaymentStatus::PendingApproval,
            "approved" => PaymentStatus::Approved,
            "executed" => PaymentStatus::Executed,
            "rejected" => PaymentStatus::Rejected,
            "blocked" => PaymentStatus::Blocked,
            "failed" => PaymentStatus::Failed,
            other => return Err(format!("unknown payment status: {other}")),
        })
    }
}

/// Why a payment ended in `Rejected`, `Blocked` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusReason {
    InvalidIdentifier { field: String, reason: String },
    InvalidAmount { detail: String },
    InvalidCurrency { value: String, detail: String },
    CurrencyMismatch { account_currency: String, payment_currency: String },
    AccountNotFound { account_id: Uuid },
    InsufficientFunds { required: Decimal, available: Decimal },
    PeriodLocked { value_date: NaiveDate },
    SanctionsHold { entry: String, score: f64, list_version: String },
    InsufficientFundsAtExecution { required: Decimal, available: Decimal },
    ExecutionConflict { attempts: u32 },
    Cancelled { actor: ActorId, reason: String },
    Expired { pending_since: DateTime<Utc> },
}

/// Payment instruction as submitted by the initiator.
///
/// Fields are kept as submitted; validation turns them into typed values and
/// a rejected record still shows what was asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    pub debit_account_id: Uuid,
    pub debtor_iban: String,
    pub beneficiary_name: String,
    pub beneficiary_iban: String,
    pub beneficiary_bic: String,
    pub amount: Decimal,
    pub currency: String,
    pub value_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_to_end_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remittance_info: Option<String>,
    /// ISO 3166 alpha-2; taken from the beneficiary IBAN when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_country: Option<String>,
}

impl PaymentPayload {
    pub fn with_end_to_end_id(mut self, end_to_end_id: impl Into<String>) -> Self {
        self.end_to_end_id = Some(end_to_end_id.into());
        self
    }

    pub fn with_remittance_info(mut self, info: impl Into<String>) -> Self {
        self.remittance_info = Some(info.into());
        self
    }

    pub fn with_beneficiary_country(mut self, country: impl Into<String>) -> Self {
        self.beneficiary_country = Some(country.into());
        self
    }

    /// Declared country, or the IBAN prefix when none was given
    pub fn effective_beneficiary_country(&self) -> Option<String> {
        match &self.beneficiary_country {
            Some(country) => Some(country.trim().to_uppercase()),
            None => self
                .beneficiary_iban
                .trim()
                .get(..2)
                .map(|prefix| prefix.to_uppercase()),
        }
    }

    /// SHA-256 of the canonical JSON form, used to detect a reused key
    pub fn request_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        sha256_hex(&canonical)
    }
}

/// Idempotency key for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Use a caller-supplied key as-is
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key from the originating message id, its sequence number
    /// and the payload.
    pub fn derive(message_id: &str, sequence: u64, payload: &PaymentPayload) -> Self {
        let input = format!("{}|{}|{}", message_id, sequence, payload.request_hash());
        Self(sha256_hex(input.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payment instruction and its current position in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub initiator: ActorId,
    pub approver: Option<ActorId>,
    pub instruction: PaymentPayload,
    pub end_to_end_id: String,
    pub status: PaymentStatus,
    pub reason: Option<StatusReason>,
    pub screening: Option<ScreeningResult>,
    pub idempotency_key: IdempotencyKey,
    pub request_hash: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_signature: Option<ApprovalSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanctions_override: Option<SanctionsOverride>,
}

/// Attempted transition not in the status table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

impl PaymentRequest {
    /// Create the initial `Draft` record for a submission.
    pub fn draft(
        initiator: ActorId,
        instruction: PaymentPayload,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Self {
        let end_to_end_id = instruction
            .end_to_end_id
            .clone()
            .unwrap_or_else(generate_end_to_end_id);
        let request_hash = instruction.request_hash();

        Self {
            id: Uuid::new_v4(),
            initiator,
            approver: None,
            instruction,
            end_to_end_id,
            status: PaymentStatus::Draft,
            reason: None,
            screening: None,
            idempotency_key,
            request_hash,
            created_at: now,
            modified_at: now,
            approved_at: None,
            approval_signature: None,
            sanctions_override: None,
        }
    }

    /// Produce the record as it looks after moving to `next`.
    pub fn transition(
        &self,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<PaymentRequest, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let mut updated = self.clone();
        updated.status = next;
        updated.modified_at = now;
        if matches!(next, PaymentStatus::Screened | PaymentStatus::PendingApproval) {
            updated.reason = None;
        }
        Ok(updated)
    }

    pub fn with_reason(mut self, reason: StatusReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_screening(mut self, screening: ScreeningResult) -> Self {
        self.screening = Some(screening);
        self
    }

    pub fn with_approver(mut self, approver: ActorId, at: DateTime<Utc>) -> Self {
        self.approver = Some(approver);
        self.approved_at = Some(at);
        self
    }

    pub fn with_approval_signature(mut self, signature: ApprovalSignature) -> Self {
        self.approval_signature = Some(signature);
        self
    }

    pub fn with_sanctions_override(mut self, release: SanctionsOverride) -> Self {
        self.sanctions_override = Some(release);
        self
    }

    /// The stored screening is a hold that no override has released.
    ///
    /// An override only releases the hold from the list version it was
    /// given for.
    pub fn has_unreleased_hold(&self) -> bool {
        match &self.screening {
            Some(screening) if screening.is_hold() => !self
                .sanctions_override
                .as_ref()
                .is_some_and(|release| release.list_version == screening.list_version),
            _ => false,
        }
    }

    pub fn debit_account_id(&self) -> Uuid {
        self.instruction.debit_account_id
    }

    pub fn amount(&self) -> Decimal {
        self.instruction.amount
    }
}

/// `E2E-` followed by 16 upper-case hex characters
fn generate_end_to_end_id() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("E2E-{}", &id[..16])
}

pub(crate) fn sha256_hex(input: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}
