//! Execution of approved payments
//!
//! Runs under the per-account lock from the concurrency coordinator. The
//! approval signature is checked first. Funds are re-checked against a fresh
//! snapshot and the debit is applied only if the account version has not
//! moved since that snapshot. The account store posts at most one debit per
//! payment, so an execution retried after a lost commit completes the
//! payment without moving money again.

use serde_json::{json, Value};
use uuid::Uuid;

use super::controller::{collaborator_error, ApprovalController};
use crate::collaborators::DebitOutcome;
use crate::domain::{
    Amount, Currency, DebitRecord, OperationContext, PaymentError, PaymentRequest,
    PaymentStatus, StatusReason,
};
use crate::ledger::{AuditAction, AuditDraft};
use crate::validation::FundsError;

/// Debit attempts before a version conflict fails the payment
const MAX_DEBIT_ATTEMPTS: u32 = 2;

impl ApprovalController {
    /// Execute an approved payment.
    ///
    /// Only needed when automatic execution after approval is disabled.
    /// Executed and failed payments are returned unchanged.
    pub async fn execute(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let payment = self.get(payment_id).await?;
        match payment.status {
            PaymentStatus::Approved => self.execute_approved(payment_id, context).await,
            PaymentStatus::Executed | PaymentStatus::Failed => Ok(payment),
            other => Err(self
                .refuse_transition(&payment, other, PaymentStatus::Executed, context)
                .await),
        }
    }

    pub(super) async fn execute_approved(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let account_id = self.get(payment_id).await?.debit_account_id();
        let _guard = self.coordinator.lock(account_id).await;

        // Re-read under the lock; another caller may have finished first
        let payment = self.get(payment_id).await?;
        match payment.status {
            PaymentStatus::Approved => {}
            PaymentStatus::Executed | PaymentStatus::Failed => return Ok(payment),
            other => {
                return Err(self
                    .refuse_transition(&payment, other, PaymentStatus::Executed, context)
                    .await)
            }
        }

        self.verify_approval(&payment, context).await?;

        let amount = Amount::new(payment.amount())
            .map_err(|e| PaymentError::validation(Some(payment_id), "amount", e.to_string()))?;
        let currency = Currency::new(&payment.instruction.currency)
            .map_err(|e| PaymentError::validation(Some(payment_id), "currency", e.to_string()))?;

        let applied = self
            .collaborators
            .accounts
            .applied_debit(account_id, payment_id)
            .await
            .map_err(|e| collaborator_error(Some(payment_id), e))?;
        if let Some(record) = applied {
            return self.complete_recovered(&payment, &record, context).await;
        }

        for attempt in 1..=MAX_DEBIT_ATTEMPTS {
            let account = self
                .collaborators
                .accounts
                .snapshot(account_id)
                .await
                .map_err(|e| collaborator_error(Some(payment_id), e))?;

            if let Err(e) = self.funds.check(&account, amount, &currency) {
                let (reason, error) = match e {
                    FundsError::InsufficientFunds {
                        required,
                        available,
                    } => (
                        StatusReason::InsufficientFundsAtExecution {
                            required,
                            available,
                        },
                        PaymentError::InsufficientFundsAtExecution {
                            payment_id,
                            account_id,
                            required,
                            available,
                        },
                    ),
                    FundsError::CurrencyMismatch {
                        account_currency,
                        payment_currency,
                    } => (
                        StatusReason::CurrencyMismatch {
                            account_currency: account_currency.clone(),
                            payment_currency: payment_currency.clone(),
                        },
                        PaymentError::CurrencyMismatch {
                            payment_id,
                            account_id,
                            account_currency,
                            payment_currency,
                        },
                    ),
                };
                return Err(self.fail(&payment, reason, error, context).await);
            }

            let outcome = self
                .collaborators
                .accounts
                .debit(account_id, payment_id, amount.value(), account.version)
                .await
                .map_err(|e| collaborator_error(Some(payment_id), e))?;

            match outcome {
                DebitOutcome::Applied(after) => {
                    let detail = json!({
                        "account_id": account_id,
                        "amount": amount,
                        "balance_after": after.balance,
                        "account_version": after.version,
                        "attempt": attempt,
                    });
                    let executed = self.complete(&payment, detail, context).await?;

                    tracing::info!(
                        payment_id = %payment_id,
                        account_id = %account_id,
                        amount = %amount,
                        account_version = after.version,
                        "Payment executed"
                    );
                    return Ok(executed);
                }
                DebitOutcome::AlreadyApplied(record) => {
                    return self.complete_recovered(&payment, &record, context).await;
                }
                DebitOutcome::Conflict { current_version } => {
                    tracing::warn!(
                        payment_id = %payment_id,
                        account_id = %account_id,
                        expected_version = account.version,
                        current_version,
                        attempt,
                        "Account version moved during execution"
                    );
                    let audit = AuditDraft::new(
                        AuditAction::ExecutionConflict,
                        payment_id,
                        PaymentStatus::Approved,
                        context,
                    )
                    .detail(&json!({
                        "attempt": attempt,
                        "expected_version": account.version,
                        "current_version": current_version,
                    }));
                    self.ledger.append(audit).await?;
                }
            }
        }

        let error = PaymentError::ConcurrencyConflict {
            payment_id,
            account_id,
        };
        let reason = StatusReason::ExecutionConflict {
            attempts: MAX_DEBIT_ATTEMPTS,
        };
        Err(self.fail(&payment, reason, error, context).await)
    }

    /// Refuse execution unless the approval carries a valid signature from
    /// the configured key over this payment and approval time.
    async fn verify_approval(
        &self,
        payment: &PaymentRequest,
        context: &OperationContext,
    ) -> Result<(), PaymentError> {
        let verified = match &payment.approval_signature {
            Some(signature) if Some(signature.signed_at) != payment.approved_at => {
                Err("signature does not cover the recorded approval time".to_string())
            }
            Some(signature) => self
                .config
                .signer
                .verify(payment.id, payment.amount(), signature)
                .map_err(|e| e.to_string()),
            None => Err("approval is not signed".to_string()),
        };

        let Err(detail) = verified else {
            return Ok(());
        };
        tracing::error!(
            payment_id = %payment.id,
            detail = %detail,
            "Approval signature rejected"
        );
        let error = PaymentError::ApprovalSignatureInvalid {
            payment_id: payment.id,
            detail,
        };
        Err(self
            .refuse(payment, AuditAction::SignatureRejected, context, error)
            .await)
    }

    /// Commit `Executed` with the debit details.
    async fn complete(
        &self,
        payment: &PaymentRequest,
        detail: Value,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let executed = self.step(payment, PaymentStatus::Executed)?;
        let audit = AuditDraft::transition(
            AuditAction::Executed,
            payment.id,
            Some(PaymentStatus::Approved),
            PaymentStatus::Executed,
            context,
        )
        .detail(&detail);
        self.commit(payment, executed, audit).await
    }

    /// Finish a payment whose debit was posted by an earlier attempt.
    async fn complete_recovered(
        &self,
        payment: &PaymentRequest,
        record: &DebitRecord,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let detail = json!({
            "account_id": record.account_id,
            "amount": record.amount,
            "balance_after": record.balance_after,
            "account_version": record.version_after,
            "debited_at": record.applied_at,
            "recovered": true,
        });
        let executed = self.complete(payment, detail, context).await?;

        tracing::warn!(
            payment_id = %payment.id,
            account_id = %record.account_id,
            account_version = record.version_after,
            "Payment executed from an earlier debit"
        );
        Ok(executed)
    }

    /// Move an approved payment to `Failed` and return the error to report.
    async fn fail(
        &self,
        payment: &PaymentRequest,
        reason: StatusReason,
        error: PaymentError,
        context: &OperationContext,
    ) -> PaymentError {
        let failed = match self.step(payment, PaymentStatus::Failed) {
            Ok(failed) => failed.with_reason(reason.clone()),
            Err(e) => return e,
        };
        let audit = AuditDraft::transition(
            AuditAction::ExecutionFailed,
            payment.id,
            Some(PaymentStatus::Approved),
            PaymentStatus::Failed,
            context,
        )
        .detail(&json!({
            "error_code": error.error_code(),
            "message": error.to_string(),
            "reason": reason,
        }));

        if let Err(commit_error) = self.commit(payment, failed, audit).await {
            return commit_error;
        }

        tracing::warn!(
            payment_id = %payment.id,
            error_code = error.error_code(),
            "Payment execution failed"
        );
        error
    }
}
