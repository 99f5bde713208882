//! Domain Error Types
//!
//! Errors raised by the payment pipeline. They carry the payment and the
//! offending field, account or threshold so a caller can act on them without
//! parsing messages.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::context::ActorId;
use super::payment::PaymentStatus;

/// Payment pipeline errors
///
/// Every variant concerning an existing payment has already been recorded in
/// the audit ledger by the time it is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PaymentError {
    /// An identifier, amount or currency failed validation
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        payment_id: Option<Uuid>,
        field: String,
        reason: String,
    },

    /// Account and payment currencies differ
    #[error("Currency mismatch on account {account_id}: account {account_currency}, payment {payment_currency}")]
    CurrencyMismatch {
        payment_id: Uuid,
        account_id: Uuid,
        account_currency: String,
        payment_currency: String,
    },

    /// Available balance below the requested amount at submission
    #[error("Insufficient funds on account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        payment_id: Uuid,
        account_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    /// Available balance below the requested amount under the execution lock
    #[error("Insufficient funds at execution on account {account_id}: required {required}, available {available}")]
    InsufficientFundsAtExecution {
        payment_id: Uuid,
        account_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    /// Approver is the initiator
    #[error("Actor {actor} cannot approve payment {payment_id} they initiated")]
    SelfApproval { payment_id: Uuid, actor: ActorId },

    /// Payee matched a watch-list entry at or above the threshold
    #[error("Payment {payment_id} held by sanctions screening: {entry} scored {score:.4} (threshold {threshold})")]
    SanctionsHold {
        payment_id: Uuid,
        entry: String,
        score: f64,
        threshold: f64,
    },

    /// Value date falls in a locked accounting period
    #[error("Value date {value_date} of payment {payment_id} falls in a locked period")]
    PeriodLocked {
        payment_id: Uuid,
        value_date: NaiveDate,
    },

    /// Account version moved between snapshot and debit
    #[error("Concurrent modification of account {account_id} while executing payment {payment_id}")]
    ConcurrencyConflict { payment_id: Uuid, account_id: Uuid },

    /// The authorizer denied the action
    #[error("Actor {actor} is not authorized to {action}")]
    AuthorizationDenied {
        payment_id: Option<Uuid>,
        actor: ActorId,
        action: String,
    },

    /// Stored audit entries failed verification
    #[error("Audit integrity violation for payment {payment_id:?}: {detail}")]
    AuditIntegrityViolation {
        payment_id: Option<Uuid>,
        detail: String,
    },

    /// Approval signature missing or not made by the configured key
    #[error("Approval signature of payment {payment_id} rejected: {detail}")]
    ApprovalSignatureInvalid { payment_id: Uuid, detail: String },

    /// Only executed payments can be exported
    #[error("Payment {payment_id} cannot be exported in status {status}")]
    ExportNotAllowed {
        payment_id: Uuid,
        status: PaymentStatus,
    },

    /// Transition not allowed from the current status
    #[error("Payment {payment_id} cannot move from {from} to {to}")]
    InvalidTransition {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// Idempotency key reused with a different payload
    #[error("Idempotency key {key} was already used with a different request")]
    IdempotencyConflict { key: String, existing_payment_id: Uuid },

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Account not found: {account_id}")]
    AccountNotFound {
        payment_id: Option<Uuid>,
        account_id: Uuid,
    },

    /// Persistence or collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Create a validation error
    pub fn validation(
        payment_id: Option<Uuid>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            payment_id,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an authorization error
    pub fn denied(payment_id: Option<Uuid>, actor: ActorId, action: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            payment_id,
            actor,
            action: action.into(),
        }
    }

    /// Create an audit integrity error
    pub fn integrity(payment_id: Option<Uuid>, detail: impl Into<String>) -> Self {
        Self::AuditIntegrityViolation {
            payment_id,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::InsufficientFundsAtExecution { .. } => "INSUFFICIENT_FUNDS_AT_EXECUTION",
            Self::SelfApproval { .. } => "SELF_APPROVAL",
            Self::SanctionsHold { .. } => "SANCTIONS_HOLD",
            Self::PeriodLocked { .. } => "PERIOD_LOCKED",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::AuthorizationDenied { .. } => "AUTHORIZATION_DENIED",
            Self::AuditIntegrityViolation { .. } => "AUDIT_INTEGRITY_VIOLATION",
            Self::ApprovalSignatureInvalid { .. } => "APPROVAL_SIGNATURE_INVALID",
            Self::ExportNotAllowed { .. } => "EXPORT_NOT_ALLOWED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// The request itself is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::CurrencyMismatch { .. }
                | Self::InsufficientFunds { .. }
                | Self::SelfApproval { .. }
                | Self::PeriodLocked { .. }
                | Self::AuthorizationDenied { .. }
                | Self::ExportNotAllowed { .. }
                | Self::InvalidTransition { .. }
                | Self::IdempotencyConflict { .. }
                | Self::PaymentNotFound(_)
                | Self::AccountNotFound { .. }
        )
    }

    /// Retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::Storage(_))
    }

    /// The pipeline must stop and an operator must look
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuditIntegrityViolation { .. } | Self::ApprovalSignatureInvalid { .. }
        )
    }

    /// Payment this error concerns, when known
    pub fn payment_id(&self) -> Option<Uuid> {
        match self {
            Self::Validation { payment_id, .. }
            | Self::AuthorizationDenied { payment_id, .. }
            | Self::AuditIntegrityViolation { payment_id, .. }
            | Self::AccountNotFound { payment_id, .. } => *payment_id,
            Self::CurrencyMismatch { payment_id, .. }
            | Self::InsufficientFunds { payment_id, .. }
            | Self::InsufficientFundsAtExecution { payment_id, .. }
            | Self::SelfApproval { payment_id, .. }
            | Self::SanctionsHold { payment_id, .. }
            | Self::PeriodLocked { payment_id, .. }
            | Self::ConcurrencyConflict { payment_id, .. }
            | Self::ApprovalSignatureInvalid { payment_id, .. }
            | Self::ExportNotAllowed { payment_id, .. }
            | Self::InvalidTransition { payment_id, .. } => Some(*payment_id),
            Self::IdempotencyConflict {
                existing_payment_id,
                ..
            } => Some(*existing_payment_id),
            Self::PaymentNotFound(id) => Some(*id),
            Self::Storage(_) => None,
        }
    }
}
