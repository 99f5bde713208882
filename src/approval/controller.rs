//! Approval controller operations

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{Collaborators, ControllerConfig};
use crate::collaborators::{Action, CollaboratorError, Decision};
use crate::coordinator::ConcurrencyCoordinator;
use crate::domain::{
    Amount, AmountError, Currency, IdempotencyKey, OperationContext, PaymentError,
    PaymentPayload, PaymentRequest, PaymentStatus, SanctionsOverride, ScreeningResult,
    StatusReason,
};
use crate::export::{ExportConfig, ExportFormatter, Pain001Export};
use crate::ledger::{AuditAction, AuditDraft, AuditEntry, AuditLedger};
use crate::screening::{SanctionsScreener, ScreeningConfig};
use crate::store::{PaymentStore, StoreError};
use crate::validation::{FundsError, FundsValidator, IdentifierValidator};

// =========================================================================
// ApprovalController
// =========================================================================

/// Drives payments through the approval pipeline.
#[derive(Debug)]
pub struct ApprovalController {
    pub(super) store: Arc<dyn PaymentStore>,
    pub(super) ledger: AuditLedger,
    pub(super) collaborators: Collaborators,
    pub(super) screener: SanctionsScreener,
    pub(super) identifiers: IdentifierValidator,
    pub(super) funds: FundsValidator,
    pub(super) coordinator: ConcurrencyCoordinator,
    pub(super) exporter: ExportFormatter,
    pub(super) config: ControllerConfig,
}

impl ApprovalController {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        collaborators: Collaborators,
        config: ControllerConfig,
        screening: ScreeningConfig,
        export: ExportConfig,
    ) -> Self {
        Self {
            ledger: AuditLedger::new(store.clone()),
            screener: SanctionsScreener::new(screening, collaborators.watch_list.clone()),
            store,
            collaborators,
            identifiers: IdentifierValidator::new(),
            funds: FundsValidator,
            coordinator: ConcurrencyCoordinator::new(),
            exporter: ExportFormatter::new(export),
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn coordinator(&self) -> &ConcurrencyCoordinator {
        &self.coordinator
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit a payment instruction.
    ///
    /// Runs validation and screening and leaves the payment in
    /// `PendingApproval`. A resubmission with the same key gets the same
    /// answer as the first call: the existing payment, continuing the
    /// pipeline if it stopped part way, or the error that stopped it.
    pub async fn submit(
        &self,
        context: &OperationContext,
        payload: PaymentPayload,
        idempotency_key: IdempotencyKey,
    ) -> Result<PaymentRequest, PaymentError> {
        if let Some(existing) = self.find_resubmission(&idempotency_key, &payload).await? {
            return self.resume(existing, context).await;
        }

        let draft = PaymentRequest::draft(
            context.actor.clone(),
            payload,
            idempotency_key.clone(),
            Utc::now(),
        );

        let audit = AuditDraft::transition(
            AuditAction::Submitted,
            draft.id,
            None,
            PaymentStatus::Draft,
            context,
        )
        .detail(&json!({
            "debit_account_id": draft.debit_account_id(),
            "amount": draft.amount(),
            "currency": draft.instruction.currency,
            "beneficiary_name": draft.instruction.beneficiary_name,
            "end_to_end_id": draft.end_to_end_id,
            "request_hash": draft.request_hash,
        }));

        match self.store.create(&draft, audit).await {
            Ok(_) => {}
            Err(StoreError::DuplicateIdempotencyKey(_)) => {
                // Lost a race with an identical submission
                let payload = draft.instruction;
                return match self.find_resubmission(&idempotency_key, &payload).await? {
                    Some(existing) => self.resume(existing, context).await,
                    None => Err(PaymentError::Storage(format!(
                        "idempotency key {idempotency_key} reported taken but not found"
                    ))),
                };
            }
            Err(e) => return Err(storage(e)),
        }

        tracing::info!(
            payment_id = %draft.id,
            initiator = %draft.initiator,
            amount = %draft.amount(),
            currency = %draft.instruction.currency,
            "Payment submitted"
        );

        self.advance(draft, context).await
    }

    /// Existing payment for `key`, if the payload matches the original.
    async fn find_resubmission(
        &self,
        key: &IdempotencyKey,
        payload: &PaymentPayload,
    ) -> Result<Option<PaymentRequest>, PaymentError> {
        let Some(existing) = self
            .store
            .find_by_idempotency_key(key)
            .await
            .map_err(storage)?
        else {
            return Ok(None);
        };

        if existing.request_hash != payload.request_hash() {
            tracing::warn!(
                payment_id = %existing.id,
                idempotency_key = %key,
                "Idempotency key reused with a different payload"
            );
            return Err(PaymentError::IdempotencyConflict {
                key: key.to_string(),
                existing_payment_id: existing.id,
            });
        }

        tracing::debug!(payment_id = %existing.id, "Duplicate submission");
        Ok(Some(existing))
    }

    /// Answer a resubmission.
    async fn resume(
        &self,
        existing: PaymentRequest,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        if let Some(error) = submission_error(&existing) {
            return Err(error);
        }
        self.advance(existing, context).await
    }

    /// Run the automatic steps that remain for a payment.
    async fn advance(
        &self,
        mut payment: PaymentRequest,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        if payment.status == PaymentStatus::Draft {
            payment = self.validate_draft(payment, context).await?;
        }
        if payment.status == PaymentStatus::Validated {
            payment = self.screen_validated(payment, context).await?;
        }
        if payment.status == PaymentStatus::Screened {
            payment = self.queue_for_approval(payment, context).await?;
        }
        Ok(payment)
    }

    // =========================================================================
    // Draft -> Validated
    // =========================================================================

    async fn validate_draft(
        &self,
        draft: PaymentRequest,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let mut validated = self.step(&draft, PaymentStatus::Validated)?;

        match self.check_instruction(&mut validated).await {
            Ok(()) => {}
            // Collaborator outage: leave the draft for a resubmission to resume
            Err(Rejection::Unavailable(error)) => return Err(error),
            Err(Rejection::Invalid(reason, error)) => {
                let rejected = self
                    .step(&draft, PaymentStatus::Rejected)?
                    .with_reason(reason.clone());
                let audit = AuditDraft::transition(
                    AuditAction::ValidationFailed,
                    draft.id,
                    Some(PaymentStatus::Draft),
                    PaymentStatus::Rejected,
                    context,
                )
                .detail(&json!({
                    "error_code": error.error_code(),
                    "message": error.to_string(),
                    "reason": reason,
                }));
                self.commit(&draft, rejected, audit).await?;

                tracing::warn!(
                    payment_id = %draft.id,
                    error_code = error.error_code(),
                    "Payment rejected at validation"
                );
                return Err(error);
            }
        }

        let audit = AuditDraft::transition(
            AuditAction::Validated,
            draft.id,
            Some(PaymentStatus::Draft),
            PaymentStatus::Validated,
            context,
        );
        self.commit(&draft, validated, audit).await
    }

    /// Check identifiers, amount, currency, period lock and funds.
    ///
    /// Normalized identifiers are written back into the instruction.
    async fn check_instruction(&self, payment: &mut PaymentRequest) -> Result<(), Rejection> {
        let id = payment.id;
        let instruction = &mut payment.instruction;

        let invalid = |field: &str, reason: String| {
            Rejection::Invalid(
                StatusReason::InvalidIdentifier {
                    field: field.to_string(),
                    reason: reason.clone(),
                },
                PaymentError::validation(Some(id), field, reason),
            )
        };

        instruction.debtor_iban = self
            .identifiers
            .validate_iban(&instruction.debtor_iban)
            .map_err(|e| invalid("debtor_iban", e.to_string()))?;
        instruction.beneficiary_iban = self
            .identifiers
            .validate_iban(&instruction.beneficiary_iban)
            .map_err(|e| invalid("beneficiary_iban", e.to_string()))?;
        instruction.beneficiary_bic = self
            .identifiers
            .validate_bic(&instruction.beneficiary_bic)
            .map_err(|e| invalid("beneficiary_bic", e.to_string()))?;
        if let Some(country) = instruction.beneficiary_country.as_deref() {
            let country = self
                .identifiers
                .validate_country(country)
                .map_err(|e| invalid("beneficiary_country", e.to_string()))?;
            instruction.beneficiary_country = Some(country);
        }

        if instruction.beneficiary_name.trim().is_empty() {
            return Err(invalid("beneficiary_name", "must not be empty".to_string()));
        }

        let amount = Amount::new(instruction.amount).map_err(|e: AmountError| {
            Rejection::Invalid(
                StatusReason::InvalidAmount {
                    detail: e.to_string(),
                },
                PaymentError::validation(Some(id), "amount", e.to_string()),
            )
        })?;

        let currency = Currency::new(&instruction.currency).map_err(|e| {
            Rejection::Invalid(
                StatusReason::InvalidCurrency {
                    value: instruction.currency.clone(),
                    detail: e.to_string(),
                },
                PaymentError::validation(Some(id), "currency", e.to_string()),
            )
        })?;
        instruction.currency = currency.to_string();

        let value_date = instruction.value_date;
        let locked = self
            .collaborators
            .periods
            .is_locked(value_date)
            .await
            .map_err(|e| Rejection::Unavailable(storage(e)))?;
        if locked {
            return Err(Rejection::Invalid(
                StatusReason::PeriodLocked { value_date },
                PaymentError::PeriodLocked {
                    payment_id: id,
                    value_date,
                },
            ));
        }

        let account_id = instruction.debit_account_id;
        let account = match self.collaborators.accounts.snapshot(account_id).await {
            Ok(account) => account,
            Err(CollaboratorError::AccountNotFound(_)) => {
                return Err(Rejection::Invalid(
                    StatusReason::AccountNotFound { account_id },
                    PaymentError::AccountNotFound {
                        payment_id: Some(id),
                        account_id,
                    },
                ))
            }
            Err(e) => return Err(Rejection::Unavailable(storage(e))),
        };

        self.funds
            .check(&account, amount, &currency)
            .map_err(|e| funds_rejection(id, account_id, e))
    }

    // =========================================================================
    // Validated -> Screened | Blocked
    // =========================================================================

    async fn screen_validated(
        &self,
        validated: PaymentRequest,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let result = self
            .screener
            .screen(
                validated.id,
                &validated.instruction.beneficiary_name,
                Some(&validated.instruction.beneficiary_bic),
                validated
                    .instruction
                    .effective_beneficiary_country()
                    .as_deref(),
            )
            .await
            .map_err(storage)?;

        if result.is_hold() {
            let error = hold_error(validated.id, &result);
            let blocked = self
                .step(&validated, PaymentStatus::Blocked)?
                .with_reason(StatusReason::SanctionsHold {
                    entry: result.best_entry_name().to_string(),
                    score: result.score,
                    list_version: result.list_version.clone(),
                })
                .with_screening(result.clone());
            let audit = AuditDraft::transition(
                AuditAction::SanctionsHold,
                validated.id,
                Some(PaymentStatus::Validated),
                PaymentStatus::Blocked,
                context,
            )
            .detail(&result);
            self.commit(&validated, blocked, audit).await?;

            tracing::warn!(
                payment_id = %validated.id,
                entry = %result.best_entry_name(),
                score = result.score,
                list_version = %result.list_version,
                "Payment blocked by sanctions screening"
            );
            return Err(error);
        }

        let screened = self
            .step(&validated, PaymentStatus::Screened)?
            .with_screening(result.clone());
        let audit = AuditDraft::transition(
            AuditAction::Screened,
            validated.id,
            Some(PaymentStatus::Validated),
            PaymentStatus::Screened,
            context,
        )
        .detail(&result);
        self.commit(&validated, screened, audit).await
    }

    // =========================================================================
    // Screened -> PendingApproval
    // =========================================================================

    async fn queue_for_approval(
        &self,
        screened: PaymentRequest,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let pending = self.step(&screened, PaymentStatus::PendingApproval)?;
        let audit = AuditDraft::transition(
            AuditAction::QueuedForApproval,
            screened.id,
            Some(PaymentStatus::Screened),
            PaymentStatus::PendingApproval,
            context,
        );
        let pending = self.commit(&screened, pending, audit).await?;

        tracing::info!(payment_id = %pending.id, "Payment awaiting approval");
        Ok(pending)
    }

    // =========================================================================
    // PendingApproval -> Approved
    // =========================================================================

    /// Approve a pending payment and, unless disabled, execute it.
    pub async fn approve(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let payment = self.get(payment_id).await?;

        match payment.status {
            PaymentStatus::PendingApproval => {}
            PaymentStatus::Approved | PaymentStatus::Executed | PaymentStatus::Failed => {
                return Ok(payment)
            }
            other => {
                return Err(self
                    .refuse_transition(&payment, other, PaymentStatus::Approved, context)
                    .await)
            }
        }

        self.authorize(&payment, Action::Approve, context).await?;

        if payment.initiator == context.actor {
            let error = PaymentError::SelfApproval {
                payment_id,
                actor: context.actor.clone(),
            };
            tracing::warn!(
                payment_id = %payment_id,
                actor = %context.actor,
                "Self-approval attempt refused"
            );
            return Err(self
                .refuse(&payment, AuditAction::SelfApprovalAttempt, context, error)
                .await);
        }

        let payment = self.rescreen_if_list_changed(payment, context).await?;

        let unreleased = payment
            .screening
            .as_ref()
            .filter(|_| payment.has_unreleased_hold());
        if let Some(screening) = unreleased {
            let error = hold_error(payment_id, screening);
            tracing::warn!(
                payment_id = %payment_id,
                approver = %context.actor,
                "Approval refused, sanctions hold not released"
            );
            return Err(self
                .refuse(&payment, AuditAction::SanctionsHold, context, error)
                .await);
        }

        let now = Utc::now().trunc_subsecs(6);
        let signature = self.config.signer.sign(payment_id, payment.amount(), now);
        let approved = self
            .step(&payment, PaymentStatus::Approved)?
            .with_approver(context.actor.clone(), now)
            .with_approval_signature(signature.clone());
        let audit = AuditDraft::transition(
            AuditAction::Approved,
            payment_id,
            Some(PaymentStatus::PendingApproval),
            PaymentStatus::Approved,
            context,
        )
        .detail(&json!({
            "approver": context.actor,
            "initiator": payment.initiator,
            "key_fingerprint": signature.key_fingerprint,
        }));
        let approved = self.commit(&payment, approved, audit).await?;

        tracing::info!(
            payment_id = %payment_id,
            approver = %context.actor,
            key_fingerprint = %signature.key_fingerprint,
            "Payment approved"
        );

        if self.config.auto_execute {
            return self.execute_approved(payment_id, context).await;
        }
        Ok(approved)
    }

    /// Screen again when the watch list moved on since the payment was
    /// screened. The new result is stored either way; a hit stays on the
    /// payment until an override releases it.
    async fn rescreen_if_list_changed(
        &self,
        payment: PaymentRequest,
        context: &OperationContext,
    ) -> Result<PaymentRequest, PaymentError> {
        let current_version = self.screener.current_version().await.map_err(storage)?;
        let screened_version = payment.screening.as_ref().map(|s| s.list_version.as_str());
        if screened_version == Some(current_version.as_str()) {
            return Ok(payment);
        }

        let result = self
            .screener
            .screen_version(
                payment.id,
                &payment.instruction.beneficiary_name,
                Some(&payment.instruction.beneficiary_bic),
                payment
                    .instruction
                    .effective_beneficiary_country()
                    .as_deref(),
                &current_version,
            )
            .await
            .map_err(storage)?;

        let mut rescreened = payment.clone().with_screening(result.clone());
        rescreened.modified_at = Utc::now();
        let audit = AuditDraft::new(AuditAction::Rescreened, payment.id, payment.status, context)
            .detail(&json!({
                "previous_version": screened_version,
                "result": result,
            }));
        let rescreened = self.commit(&payment, rescreened, audit).await?;

        if result.is_hold() {
            tracing::warn!(
                payment_id = %payment.id,
                entry = %result.best_entry_name(),
                score = result.score,
                list_version = %result.list_version,
                "Sanctions hit on re-screen"
            );
        }

        Ok(rescreened)
    }

    // =========================================================================
    // Blocked -> Screened -> PendingApproval
    // =========================================================================

    /// Release a sanctions hold after manual review.
    ///
    /// A blocked payment goes back to the approval queue. A pending payment
    /// held by a re-screen stays pending with the hold released. The
    /// override is bound to the list version that produced the hit.
    pub async fn override_hold(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
        justification: &str,
    ) -> Result<PaymentRequest, PaymentError> {
        let payment = self.get(payment_id).await?;

        let pending_hold =
            payment.status == PaymentStatus::PendingApproval && payment.has_unreleased_hold();
        if payment.status != PaymentStatus::Blocked && !pending_hold {
            let already_overridden = payment.screening.as_ref().is_some_and(|s| s.is_hold())
                && !matches!(payment.status, PaymentStatus::Rejected);
            if already_overridden {
                return Ok(payment);
            }
            return Err(self
                .refuse_transition(&payment, payment.status, PaymentStatus::Screened, context)
                .await);
        }

        self.authorize(&payment, Action::OverrideSanctions, context)
            .await?;

        if payment.initiator == context.actor {
            let error = PaymentError::SelfApproval {
                payment_id,
                actor: context.actor.clone(),
            };
            return Err(self
                .refuse(&payment, AuditAction::SelfApprovalAttempt, context, error)
                .await);
        }

        let screening = payment.screening.as_ref();
        let release = SanctionsOverride {
            actor: context.actor.clone(),
            justification: justification.to_string(),
            list_version: screening
                .map(|s| s.list_version.clone())
                .unwrap_or_default(),
            entry_id: screening
                .and_then(|s| s.best_match.as_ref())
                .map(|m| m.entry_id.clone()),
            overridden_at: Utc::now(),
        };
        let detail = json!({
            "justification": justification,
            "entry": screening.map(|s| s.best_entry_name()),
            "score": screening.map(|s| s.score),
            "list_version": release.list_version,
        });

        if pending_hold {
            let mut released = payment.clone().with_sanctions_override(release);
            released.modified_at = Utc::now();
            let audit = AuditDraft::new(
                AuditAction::SanctionsOverride,
                payment_id,
                PaymentStatus::PendingApproval,
                context,
            )
            .detail(&detail);
            let released = self.commit(&payment, released, audit).await?;

            tracing::warn!(
                payment_id = %payment_id,
                actor = %context.actor,
                "Sanctions hold from re-screen overridden"
            );
            return Ok(released);
        }

        let screened = self
            .step(&payment, PaymentStatus::Screened)?
            .with_sanctions_override(release);
        let audit = AuditDraft::transition(
            AuditAction::SanctionsOverride,
            payment_id,
            Some(PaymentStatus::Blocked),
            PaymentStatus::Screened,
            context,
        )
        .detail(&detail);
        let screened = self.commit(&payment, screened, audit).await?;

        tracing::warn!(
            payment_id = %payment_id,
            actor = %context.actor,
            "Sanctions hold overridden"
        );

        self.queue_for_approval(screened, context).await
    }

    // =========================================================================
    // Any pre-execution state -> Rejected
    // =========================================================================

    /// Cancel a payment that has not been executed.
    pub async fn reject(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
        reason: &str,
    ) -> Result<PaymentRequest, PaymentError> {
        let payment = self.get(payment_id).await?;

        if payment.status == PaymentStatus::Rejected {
            return Ok(payment);
        }
        if !payment.status.is_cancellable() {
            return Err(self
                .refuse_transition(&payment, payment.status, PaymentStatus::Rejected, context)
                .await);
        }

        self.authorize(&payment, Action::Reject, context).await?;

        // Cannot interleave with an execution in flight on the account
        let _guard = if payment.status == PaymentStatus::Approved {
            Some(self.coordinator.lock(payment.debit_account_id()).await)
        } else {
            None
        };
        let payment = self.get(payment_id).await?;
        if payment.status == PaymentStatus::Rejected {
            return Ok(payment);
        }
        if !payment.status.is_cancellable() {
            return Err(self
                .refuse_transition(&payment, payment.status, PaymentStatus::Rejected, context)
                .await);
        }

        let rejected = self
            .step(&payment, PaymentStatus::Rejected)?
            .with_reason(StatusReason::Cancelled {
                actor: context.actor.clone(),
                reason: reason.to_string(),
            });
        let audit = AuditDraft::transition(
            AuditAction::Cancelled,
            payment_id,
            Some(payment.status),
            PaymentStatus::Rejected,
            context,
        )
        .detail(&json!({ "reason": reason }));
        let rejected = self.commit(&payment, rejected, audit).await?;

        tracing::info!(
            payment_id = %payment_id,
            actor = %context.actor,
            from = %payment.status,
            "Payment cancelled"
        );
        Ok(rejected)
    }

    // =========================================================================
    // PendingApproval -> Rejected (expiry)
    // =========================================================================

    /// Reject payments that waited for approval longer than the configured
    /// policy allows. Returns the ids that were expired.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, PaymentError> {
        let Some(policy) = self.config.expiry else {
            return Ok(Vec::new());
        };

        let pending = self
            .store
            .find_by_status(PaymentStatus::PendingApproval, self.config.expiry_batch_size)
            .await
            .map_err(storage)?;

        let context = OperationContext::system();
        let mut expired = Vec::new();

        for payment in pending {
            let Some(due) = payment.modified_at.checked_add_signed(policy.pending_ttl) else {
                continue;
            };
            if due > now {
                continue;
            }

            let rejected = self
                .step(&payment, PaymentStatus::Rejected)?
                .with_reason(StatusReason::Expired {
                    pending_since: payment.modified_at,
                });
            let audit = AuditDraft::transition(
                AuditAction::Expired,
                payment.id,
                Some(PaymentStatus::PendingApproval),
                PaymentStatus::Rejected,
                &context,
            )
            .detail(&json!({
                "pending_since": payment.modified_at,
                "ttl_minutes": policy.pending_ttl.num_minutes(),
            }));

            match self
                .store
                .commit_transition(PaymentStatus::PendingApproval, &rejected, audit)
                .await
            {
                Ok(_) => expired.push(payment.id),
                // Approved or cancelled meanwhile
                Err(StoreError::StatusConflict { .. }) => continue,
                Err(e) => return Err(storage(e)),
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired pending approvals");
        }
        Ok(expired)
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Generate the pain.001 message for an executed payment.
    pub async fn export(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
    ) -> Result<Pain001Export, PaymentError> {
        let payment = self.get(payment_id).await?;
        self.export_batch(&[payment.id], context).await
    }

    /// Generate one pain.001 message for several executed payments.
    pub async fn export_batch(
        &self,
        payment_ids: &[Uuid],
        context: &OperationContext,
    ) -> Result<Pain001Export, PaymentError> {
        let mut payments = Vec::with_capacity(payment_ids.len());
        for id in payment_ids {
            payments.push(self.get(*id).await?);
        }

        for payment in &payments {
            self.authorize(payment, Action::Export, context).await?;
        }

        if let Some(payment) = payments
            .iter()
            .find(|p| p.status != PaymentStatus::Executed)
        {
            let error = PaymentError::ExportNotAllowed {
                payment_id: payment.id,
                status: payment.status,
            };
            return Err(self
                .refuse(payment, AuditAction::ExportRefused, context, error)
                .await);
        }

        let export = self.exporter.format(&payments, Utc::now())?;

        for payment in &payments {
            let audit =
                AuditDraft::new(AuditAction::Exported, payment.id, payment.status, context)
                    .detail(&json!({
                        "message_id": export.message_id,
                        "control_sum": export.control_sum,
                        "transactions": export.number_of_transactions,
                    }));
            self.ledger.append(audit).await?;
        }

        Ok(export)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, payment_id: Uuid) -> Result<PaymentRequest, PaymentError> {
        self.store
            .get(payment_id)
            .await
            .map_err(storage)?
            .ok_or(PaymentError::PaymentNotFound(payment_id))
    }

    /// Drop memoized screening results for superseded list versions
    pub async fn trim_screening_cache(&self) -> Result<(), PaymentError> {
        let version = self.screener.current_version().await.map_err(storage)?;
        self.screener.retain_version(&version);
        Ok(())
    }

    /// Verified audit trail of a payment
    pub async fn audit_trail(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>, PaymentError> {
        self.get(payment_id).await?;
        self.ledger.read(payment_id).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Record with the next status, or `InvalidTransition`
    pub(super) fn step(
        &self,
        payment: &PaymentRequest,
        to: PaymentStatus,
    ) -> Result<PaymentRequest, PaymentError> {
        payment
            .transition(to, Utc::now())
            .map_err(|e| PaymentError::InvalidTransition {
                payment_id: payment.id,
                from: e.from,
                to: e.to,
            })
    }

    /// Commit `next` over `current` together with its audit entry.
    pub(super) async fn commit(
        &self,
        current: &PaymentRequest,
        next: PaymentRequest,
        audit: AuditDraft,
    ) -> Result<PaymentRequest, PaymentError> {
        match self
            .store
            .commit_transition(current.status, &next, audit)
            .await
        {
            Ok(entry) => {
                tracing::debug!(
                    payment_id = %next.id,
                    from = %current.status,
                    to = %next.status,
                    sequence = entry.sequence(),
                    "Transition committed"
                );
                Ok(next)
            }
            // The same transition won a race; hand back its result
            Err(StoreError::StatusConflict { actual, .. })
                if actual == next.status && actual != current.status =>
            {
                self.get(next.id).await
            }
            Err(StoreError::StatusConflict { actual, .. }) => Err(PaymentError::InvalidTransition {
                payment_id: next.id,
                from: actual,
                to: next.status,
            }),
            Err(e) => Err(storage(e)),
        }
    }

    /// Ask the authorizer; a denial is audited and returned.
    pub(super) async fn authorize(
        &self,
        payment: &PaymentRequest,
        action: Action,
        context: &OperationContext,
    ) -> Result<(), PaymentError> {
        let decision = self
            .collaborators
            .authorizer
            .authorize(&context.actor, action)
            .await
            .map_err(storage)?;

        if decision == Decision::Deny {
            tracing::warn!(
                payment_id = %payment.id,
                actor = %context.actor,
                action = %action,
                "Authorization denied"
            );
            let error = PaymentError::denied(Some(payment.id), context.actor.clone(), action.as_str());
            return Err(self
                .refuse(payment, AuditAction::AuthorizationDenied, context, error)
                .await);
        }
        Ok(())
    }

    /// Audit a refused request and hand back the error to return.
    pub(super) async fn refuse(
        &self,
        payment: &PaymentRequest,
        action: AuditAction,
        context: &OperationContext,
        error: PaymentError,
    ) -> PaymentError {
        let audit = AuditDraft::new(action, payment.id, payment.status, context).detail(&json!({
            "error_code": error.error_code(),
            "message": error.to_string(),
        }));

        match self.ledger.append(audit).await {
            Ok(_) => error,
            Err(audit_error) => {
                tracing::error!(
                    payment_id = %payment.id,
                    error = %audit_error,
                    "Failed to audit refused request"
                );
                audit_error
            }
        }
    }

    pub(super) async fn refuse_transition(
        &self,
        payment: &PaymentRequest,
        from: PaymentStatus,
        to: PaymentStatus,
        context: &OperationContext,
    ) -> PaymentError {
        let error = PaymentError::InvalidTransition {
            payment_id: payment.id,
            from,
            to,
        };
        self.refuse(payment, AuditAction::TransitionRefused, context, error)
            .await
    }
}

pub(super) fn storage(e: impl std::fmt::Display) -> PaymentError {
    PaymentError::Storage(e.to_string())
}

pub(super) fn collaborator_error(payment_id: Option<Uuid>, e: CollaboratorError) -> PaymentError {
    match e {
        CollaboratorError::AccountNotFound(account_id) => PaymentError::AccountNotFound {
            payment_id,
            account_id,
        },
        other => storage(other),
    }
}

fn hold_error(payment_id: Uuid, screening: &ScreeningResult) -> PaymentError {
    PaymentError::SanctionsHold {
        payment_id,
        entry: screening.best_entry_name().to_string(),
        score: screening.score,
        threshold: screening.threshold,
    }
}

/// Error the first submission returned, rebuilt from the stored outcome.
///
/// `None` when the payment was not stopped by submission checks.
fn submission_error(payment: &PaymentRequest) -> Option<PaymentError> {
    let payment_id = payment.id;
    let account_id = payment.debit_account_id();

    let error = match (payment.status, payment.reason.as_ref()?) {
        (PaymentStatus::Rejected, StatusReason::InvalidIdentifier { field, reason }) => {
            PaymentError::validation(Some(payment_id), field.as_str(), reason.as_str())
        }
        (PaymentStatus::Rejected, StatusReason::InvalidAmount { detail }) => {
            PaymentError::validation(Some(payment_id), "amount", detail.as_str())
        }
        (PaymentStatus::Rejected, StatusReason::InvalidCurrency { detail, .. }) => {
            PaymentError::validation(Some(payment_id), "currency", detail.as_str())
        }
        (
            PaymentStatus::Rejected,
            StatusReason::CurrencyMismatch {
                account_currency,
                payment_currency,
            },
        ) => PaymentError::CurrencyMismatch {
            payment_id,
            account_id,
            account_currency: account_currency.clone(),
            payment_currency: payment_currency.clone(),
        },
        (PaymentStatus::Rejected, StatusReason::AccountNotFound { account_id }) => {
            PaymentError::AccountNotFound {
                payment_id: Some(payment_id),
                account_id: *account_id,
            }
        }
        (
            PaymentStatus::Rejected,
            StatusReason::InsufficientFunds {
                required,
                available,
            },
        ) => PaymentError::InsufficientFunds {
            payment_id,
            account_id,
            required: *required,
            available: *available,
        },
        (PaymentStatus::Rejected, StatusReason::PeriodLocked { value_date }) => {
            PaymentError::PeriodLocked {
                payment_id,
                value_date: *value_date,
            }
        }
        (PaymentStatus::Blocked, StatusReason::SanctionsHold { .. }) => {
            hold_error(payment_id, payment.screening.as_ref()?)
        }
        _ => return None,
    };
    Some(error)
}

/// Why submission-time checks stopped a payment
enum Rejection {
    /// The instruction itself is unacceptable; the payment is rejected
    Invalid(StatusReason, PaymentError),
    /// A collaborator could not answer; the payment stays a draft
    Unavailable(PaymentError),
}

fn funds_rejection(payment_id: Uuid, account_id: Uuid, error: FundsError) -> Rejection {
    match error {
        FundsError::CurrencyMismatch {
            account_currency,
            payment_currency,
        } => Rejection::Invalid(
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
        FundsError::InsufficientFunds {
            required,
            available,
        } => Rejection::Invalid(
            StatusReason::InsufficientFunds {
                required,
                available,
            },
            PaymentError::InsufficientFunds {
                payment_id,
                account_id,
                required,
                available,
            },
        ),
    }
}
