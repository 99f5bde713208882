use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::{ApprovalController, Collaborators, ControllerConfig, ExpiryPolicy};
use crate::collaborators::{
    AccountStore, Action, CollaboratorError, DebitOutcome, InMemoryAccountStore,
    PeriodLockRegistry, RoleAuthorizer, StaticWatchList,
};
use crate::domain::{
    AccountSnapshot, AccountingPeriod, Currency, DebitRecord, IdempotencyKey, ListType,
    MatchedField, OperationContext, PaymentError, PaymentPayload, PaymentRequest, PaymentStatus,
    SanctionsListEntry, StatusReason,
};
use crate::export::ExportConfig;
use crate::ledger::{AuditAction, AuditDraft, AuditEntry};
use crate::screening::ScreeningConfig;
use crate::store::{InMemoryPaymentStore, PaymentStore, StoreError, StoreResult};

struct Harness {
    controller: ApprovalController,
    store: InMemoryPaymentStore,
    accounts: InMemoryAccountStore,
    authorizer: RoleAuthorizer,
    watch_list: StaticWatchList,
    periods: PeriodLockRegistry,
}

fn entry(id: &str, name: &str) -> SanctionsListEntry {
    SanctionsListEntry {
        id: id.to_string(),
        name: name.to_string(),
        aliases: Vec::new(),
        bic: None,
        country: None,
        list_type: ListType::Sdn,
        list_version: String::new(),
    }
}

fn harness_with(
    config: ControllerConfig,
    accounts: InMemoryAccountStore,
    account_store: Arc<dyn AccountStore>,
    authorizer: RoleAuthorizer,
) -> Harness {
    let store = InMemoryPaymentStore::new();
    let watch_list = StaticWatchList::new("2026-10-01", vec![entry("SDN-1", "Vladimir Putin")]);
    let periods = PeriodLockRegistry::new();

    let collaborators = Collaborators {
        accounts: account_store,
        authorizer: Arc::new(authorizer.clone()),
        watch_list: Arc::new(watch_list.clone()),
        periods: Arc::new(periods.clone()),
    };
    let controller = ApprovalController::new(
        Arc::new(store.clone()),
        collaborators,
        config,
        ScreeningConfig::default(),
        ExportConfig::default(),
    );

    Harness {
        controller,
        store,
        accounts,
        authorizer,
        watch_list,
        periods,
    }
}

fn harness_config(config: ControllerConfig) -> Harness {
    let accounts = InMemoryAccountStore::new();
    harness_with(
        config,
        accounts.clone(),
        Arc::new(accounts),
        RoleAuthorizer::permissive(),
    )
}

fn harness() -> Harness {
    harness_config(ControllerConfig::default())
}

fn payload(account_id: Uuid, amount: Decimal) -> PaymentPayload {
    PaymentPayload {
        debit_account_id: account_id,
        debtor_iban: "DE89 3704 0044 0532 0130 00".to_string(),
        beneficiary_name: "ACME Supplies GmbH".to_string(),
        beneficiary_iban: "gb29nwbk60161331926819".to_string(),
        beneficiary_bic: "NWBKGB2L".to_string(),
        amount,
        currency: "eur".to_string(),
        value_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        end_to_end_id: None,
        remittance_info: Some("Invoice 2026-0042".to_string()),
        beneficiary_country: None,
    }
}

fn alice() -> OperationContext {
    OperationContext::new("alice")
}

fn bob() -> OperationContext {
    OperationContext::new("bob")
}

async fn eur_account(harness: &Harness, balance: Decimal) -> Uuid {
    harness
        .accounts
        .open(Currency::new("EUR").unwrap(), balance)
        .await
}

async fn actions(harness: &Harness, payment_id: Uuid) -> Vec<AuditAction> {
    harness
        .controller
        .audit_trail(payment_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.action())
        .collect()
}

// =========================================================================
// Submission
// =========================================================================

#[tokio::test]
async fn test_submit_reaches_pending_approval() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;

    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(1000.00)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::PendingApproval);
    assert_eq!(payment.instruction.debtor_iban, "DE89370400440532013000");
    assert_eq!(payment.instruction.beneficiary_iban, "GB29NWBK60161331926819");
    assert_eq!(payment.instruction.currency, "EUR");
    assert!(payment.screening.as_ref().is_some_and(|s| !s.is_hold()));
    assert_eq!(
        actions(&h, payment.id).await,
        vec![
            AuditAction::Submitted,
            AuditAction::Validated,
            AuditAction::Screened,
            AuditAction::QueuedForApproval,
        ]
    );
}

#[tokio::test]
async fn test_duplicate_submission_returns_existing() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let key = IdempotencyKey::new("k1");

    let first = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), key.clone())
        .await
        .unwrap();
    let entries_before = h.store.audit_len().await;

    let second = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), key)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.store.audit_len().await, entries_before);
}

#[tokio::test]
async fn test_resubmission_repeats_rejection() {
    let h = harness();
    let account = eur_account(&h, dec!(500)).await;
    let key = IdempotencyKey::new("k1");

    let first = h
        .controller
        .submit(&alice(), payload(account, dec!(900)), key.clone())
        .await
        .unwrap_err();
    let entries_before = h.store.audit_len().await;

    let second = h
        .controller
        .submit(&alice(), payload(account, dec!(900)), key)
        .await
        .unwrap_err();

    assert!(matches!(first, PaymentError::InsufficientFunds { .. }));
    assert_eq!(first, second);
    assert_eq!(h.store.audit_len().await, entries_before);
}

#[tokio::test]
async fn test_resubmission_repeats_invalid_currency() {
    let h = harness();
    let account = eur_account(&h, dec!(500)).await;
    let mut bad = payload(account, dec!(100));
    bad.currency = "EURO".to_string();

    let first = h
        .controller
        .submit(&alice(), bad.clone(), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();
    let second = h
        .controller
        .submit(&alice(), bad, IdempotencyKey::new("k1"))
        .await
        .unwrap_err();

    assert!(matches!(first, PaymentError::Validation { ref field, .. } if field == "currency"));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reused_key_with_different_payload() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let key = IdempotencyKey::new("k1");

    let first = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), key.clone())
        .await
        .unwrap();
    let err = h
        .controller
        .submit(&alice(), payload(account, dec!(200)), key)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::IdempotencyConflict { existing_payment_id, .. } if existing_payment_id == first.id
    ));
}

#[tokio::test]
async fn test_invalid_iban_rejects_payment() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let mut bad = payload(account, dec!(100));
    bad.beneficiary_iban = "GB29NWBK60161331926818".to_string();

    let err = h
        .controller
        .submit(&alice(), bad, IdempotencyKey::new("k1"))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Validation { ref field, .. } if field == "beneficiary_iban"));

    let payment_id = err.payment_id().unwrap();
    let stored = h.controller.get(payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Rejected);
    assert!(matches!(
        stored.reason,
        Some(StatusReason::InvalidIdentifier { .. })
    ));
    assert_eq!(
        actions(&h, payment_id).await,
        vec![AuditAction::Submitted, AuditAction::ValidationFailed]
    );
}

#[tokio::test]
async fn test_insufficient_funds_at_submission() {
    let h = harness();
    let account = eur_account(&h, dec!(500)).await;

    let err = h
        .controller
        .submit(&alice(), payload(account, dec!(500.01)), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();

    match err {
        PaymentError::InsufficientFunds {
            required,
            available,
            payment_id,
            ..
        } => {
            assert_eq!(required, dec!(500.01));
            assert_eq!(available, dec!(500));
            let stored = h.controller.get(payment_id).await.unwrap();
            assert_eq!(stored.status, PaymentStatus::Rejected);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_exact_balance_is_sufficient() {
    let h = harness();
    let account = eur_account(&h, dec!(500)).await;

    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(500)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::PendingApproval);
}

#[tokio::test]
async fn test_currency_mismatch_rejected() {
    let h = harness();
    let account = h
        .accounts
        .open(Currency::new("GBP").unwrap(), dec!(5000))
        .await;

    let err = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CURRENCY_MISMATCH");
}

#[tokio::test]
async fn test_unknown_account_rejected() {
    let h = harness();
    let err = h
        .controller
        .submit(&alice(), payload(Uuid::new_v4(), dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::AccountNotFound { payment_id: Some(_), .. }));
}

#[tokio::test]
async fn test_locked_period_rejected() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    h.periods
        .lock(AccountingPeriod::new(2026, 10).unwrap(), "controller")
        .await;

    let err = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PeriodLocked { .. }));
}

// =========================================================================
// Sanctions
// =========================================================================

#[tokio::test]
async fn test_sanctions_hit_blocks_payment() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let mut suspicious = payload(account, dec!(100));
    suspicious.beneficiary_name = "Vladmir Putin".to_string();

    let err = h
        .controller
        .submit(&alice(), suspicious, IdempotencyKey::new("k1"))
        .await
        .unwrap_err();

    let PaymentError::SanctionsHold {
        payment_id,
        entry,
        score,
        threshold,
    } = err
    else {
        panic!("expected sanctions hold, got {err:?}");
    };
    assert_eq!(entry, "Vladimir Putin");
    assert!(score >= threshold);

    let stored = h.controller.get(payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Blocked);
    assert!(actions(&h, payment_id)
        .await
        .contains(&AuditAction::SanctionsHold));
}

#[tokio::test]
async fn test_resubmission_of_blocked_payment_repeats_hold() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let mut suspicious = payload(account, dec!(100));
    suspicious.beneficiary_name = "Vladmir Putin".to_string();

    let first = h
        .controller
        .submit(&alice(), suspicious.clone(), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();
    let second = h
        .controller
        .submit(&alice(), suspicious, IdempotencyKey::new("k1"))
        .await
        .unwrap_err();

    assert!(matches!(first, PaymentError::SanctionsHold { .. }));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_beneficiary_country_hit_blocks_payment() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    h.watch_list
        .publish(
            "2026-10-15",
            vec![SanctionsListEntry {
                country: Some("GB".to_string()),
                ..entry("EMB-GB", "Country embargo")
            }],
        )
        .await;

    // No declared country; the IBAN prefix is screened
    let err = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap_err();
    let payment_id = err.payment_id().unwrap();
    assert!(matches!(err, PaymentError::SanctionsHold { score, .. } if score == 1.0));

    let stored = h.controller.get(payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Blocked);
    let best = stored.screening.and_then(|s| s.best_match).unwrap();
    assert_eq!(best.matched_field, MatchedField::Country);
    assert_eq!(best.entry_id, "EMB-GB");

    let declared = h
        .controller
        .submit(
            &alice(),
            payload(account, dec!(100)).with_beneficiary_country("de"),
            IdempotencyKey::new("k2"),
        )
        .await
        .unwrap();
    assert_eq!(declared.status, PaymentStatus::PendingApproval);
    assert_eq!(declared.instruction.beneficiary_country.as_deref(), Some("DE"));
}

#[tokio::test]
async fn test_malformed_beneficiary_country_rejected() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;

    let err = h
        .controller
        .submit(
            &alice(),
            payload(account, dec!(100)).with_beneficiary_country("GBR"),
            IdempotencyKey::new("k1"),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, PaymentError::Validation { ref field, .. } if field == "beneficiary_country")
    );
}

#[tokio::test]
async fn test_override_releases_hold() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let mut suspicious = payload(account, dec!(100));
    suspicious.beneficiary_name = "Vladmir Putin".to_string();

    let payment_id = h
        .controller
        .submit(&alice(), suspicious, IdempotencyKey::new("k1"))
        .await
        .unwrap_err()
        .payment_id()
        .unwrap();

    let err = h
        .controller
        .override_hold(payment_id, &alice(), "false positive")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::SelfApproval { .. }));

    let released = h
        .controller
        .override_hold(payment_id, &OperationContext::new("carol"), "false positive")
        .await
        .unwrap();
    assert_eq!(released.status, PaymentStatus::PendingApproval);

    let trail = actions(&h, payment_id).await;
    assert!(trail.contains(&AuditAction::SanctionsOverride));
    assert_eq!(trail.last(), Some(&AuditAction::QueuedForApproval));

    let executed = h.controller.approve(payment_id, &bob()).await.unwrap();
    assert_eq!(executed.status, PaymentStatus::Executed);
}

#[tokio::test]
async fn test_rescreen_on_new_list_version() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;

    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    h.watch_list
        .publish("2026-10-15", vec![entry("OFSI-7", "ACME Supplies GmbH")])
        .await;

    let err = h.controller.approve(payment.id, &bob()).await.unwrap_err();
    assert!(matches!(err, PaymentError::SanctionsHold { .. }));

    let stored = h.controller.get(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::PendingApproval);
    assert_eq!(
        stored.screening.map(|s| s.list_version),
        Some("2026-10-15".to_string())
    );
    assert!(actions(&h, payment.id)
        .await
        .contains(&AuditAction::Rescreened));
}

#[tokio::test]
async fn test_rescreen_hold_survives_repeated_approval() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    h.watch_list
        .publish("2026-10-15", vec![entry("OFSI-7", "ACME Supplies GmbH")])
        .await;

    for _ in 0..2 {
        let err = h.controller.approve(payment.id, &bob()).await.unwrap_err();
        assert!(matches!(err, PaymentError::SanctionsHold { .. }));
        assert_eq!(
            h.controller.get(payment.id).await.unwrap().status,
            PaymentStatus::PendingApproval
        );
        assert_eq!(actions(&h, payment.id).await.last(), Some(&AuditAction::SanctionsHold));
    }
    assert_eq!(h.accounts.snapshot(account).await.unwrap().balance, dec!(5000));

    let err = h
        .controller
        .override_hold(payment.id, &alice(), "known supplier")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::SelfApproval { .. }));

    let released = h
        .controller
        .override_hold(payment.id, &OperationContext::new("carol"), "known supplier")
        .await
        .unwrap();
    assert_eq!(released.status, PaymentStatus::PendingApproval);
    assert!(!released.has_unreleased_hold());
    assert_eq!(
        released.sanctions_override.as_ref().map(|o| o.list_version.as_str()),
        Some("2026-10-15")
    );

    // Repeating the override is a no-op
    let again = h
        .controller
        .override_hold(payment.id, &OperationContext::new("carol"), "known supplier")
        .await
        .unwrap();
    assert_eq!(again.sanctions_override, released.sanctions_override);

    let executed = h.controller.approve(payment.id, &bob()).await.unwrap();
    assert_eq!(executed.status, PaymentStatus::Executed);
    assert_eq!(h.accounts.snapshot(account).await.unwrap().balance, dec!(4900));
}

#[tokio::test]
async fn test_override_refused_without_hold() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    let err = h
        .controller
        .override_hold(payment.id, &bob(), "nothing to release")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidTransition { .. }));
}

// =========================================================================
// Approval and execution
// =========================================================================

#[tokio::test]
async fn test_approve_executes_payment() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;

    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(1000)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    let executed = h.controller.approve(payment.id, &bob()).await.unwrap();

    assert_eq!(executed.status, PaymentStatus::Executed);
    assert_eq!(executed.approver.as_ref().map(|a| a.as_str()), Some("bob"));
    assert!(executed.approved_at.is_some());

    let snapshot = h.accounts.snapshot(account).await.unwrap();
    assert_eq!(snapshot.balance, dec!(4000));

    let trail = actions(&h, payment.id).await;
    assert_eq!(
        &trail[trail.len() - 2..],
        &[AuditAction::Approved, AuditAction::Executed]
    );

    // Approving again is a no-op
    let again = h.controller.approve(payment.id, &bob()).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Executed);
    assert_eq!(h.accounts.snapshot(account).await.unwrap().balance, dec!(4000));
}

#[tokio::test]
async fn test_approval_is_signed() {
    let h = harness_config(ControllerConfig {
        auto_execute: false,
        ..ControllerConfig::default()
    });
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(1000)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    let approved = h.controller.approve(payment.id, &bob()).await.unwrap();
    let signature = approved.approval_signature.clone().unwrap();
    let signer = &h.controller.config().signer;

    assert_eq!(Some(signature.signed_at), approved.approved_at);
    assert_eq!(signature.key_fingerprint, signer.fingerprint());
    assert!(signer.verify(payment.id, dec!(1000), &signature).is_ok());

    let trail = h.controller.audit_trail(payment.id).await.unwrap();
    let approval = trail
        .iter()
        .find(|e| e.action() == AuditAction::Approved)
        .unwrap();
    assert_eq!(
        approval.detail()["key_fingerprint"],
        json!(signer.fingerprint())
    );
}

#[tokio::test]
async fn test_tampered_approval_refused_at_execution() {
    let h = harness_config(ControllerConfig {
        auto_execute: false,
        ..ControllerConfig::default()
    });
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    h.controller.approve(payment.id, &bob()).await.unwrap();

    h.store
        .tamper_payment(payment.id, |p| p.instruction.amount = dec!(4000))
        .await;

    let err = h.controller.execute(payment.id, &bob()).await.unwrap_err();
    assert!(matches!(err, PaymentError::ApprovalSignatureInvalid { .. }));
    assert!(err.is_fatal());
    assert_eq!(
        h.controller.get(payment.id).await.unwrap().status,
        PaymentStatus::Approved
    );
    assert_eq!(h.accounts.snapshot(account).await.unwrap().balance, dec!(5000));
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::SignatureRejected)
    );

    h.store
        .tamper_payment(payment.id, |p| {
            p.instruction.amount = dec!(100);
            p.approval_signature = None;
        })
        .await;
    let err = h.controller.execute(payment.id, &bob()).await.unwrap_err();
    assert!(matches!(err, PaymentError::ApprovalSignatureInvalid { .. }));
}

#[tokio::test]
async fn test_self_approval_refused() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;

    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    let err = h.controller.approve(payment.id, &alice()).await.unwrap_err();

    assert!(matches!(err, PaymentError::SelfApproval { .. }));
    let stored = h.controller.get(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::PendingApproval);
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::SelfApprovalAttempt)
    );
}

#[tokio::test]
async fn test_unauthorized_approver_denied() {
    let accounts = InMemoryAccountStore::new();
    let authorizer = RoleAuthorizer::new();
    authorizer
        .grant("bob", &[Action::Approve, Action::Reject])
        .await;
    let h = harness_with(
        ControllerConfig::default(),
        accounts.clone(),
        Arc::new(accounts),
        authorizer,
    );
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    h.authorizer.revoke(&bob().actor, Action::Approve).await;
    let err = h.controller.approve(payment.id, &bob()).await.unwrap_err();

    assert!(matches!(err, PaymentError::AuthorizationDenied { .. }));
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::AuthorizationDenied)
    );
    assert_eq!(
        h.controller.get(payment.id).await.unwrap().status,
        PaymentStatus::PendingApproval
    );
}

#[tokio::test]
async fn test_funds_rechecked_at_execution() {
    let h = harness_config(ControllerConfig {
        auto_execute: false,
        ..ControllerConfig::default()
    });
    let account = eur_account(&h, dec!(500)).await;

    let first = h
        .controller
        .submit(&alice(), payload(account, dec!(300)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    let second = h
        .controller
        .submit(&alice(), payload(account, dec!(300)), IdempotencyKey::new("k2"))
        .await
        .unwrap();

    for id in [first.id, second.id] {
        let approved = h.controller.approve(id, &bob()).await.unwrap();
        assert_eq!(approved.status, PaymentStatus::Approved);
    }

    let executed = h.controller.execute(first.id, &bob()).await.unwrap();
    assert_eq!(executed.status, PaymentStatus::Executed);

    let err = h.controller.execute(second.id, &bob()).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::InsufficientFundsAtExecution { available, .. } if available == dec!(200)
    ));

    let failed = h.controller.get(second.id).await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(
        h.accounts.snapshot(account).await.unwrap().balance,
        dec!(200)
    );
}

/// Account store whose version always moves before the debit lands
#[derive(Debug, Clone, Default)]
struct MovingAccounts {
    inner: InMemoryAccountStore,
}

#[async_trait]
impl AccountStore for MovingAccounts {
    async fn snapshot(&self, account_id: Uuid) -> Result<AccountSnapshot, CollaboratorError> {
        self.inner.snapshot(account_id).await
    }

    async fn debit(
        &self,
        _account_id: Uuid,
        _payment_id: Uuid,
        _amount: Decimal,
        expected_version: i64,
    ) -> Result<DebitOutcome, CollaboratorError> {
        Ok(DebitOutcome::Conflict {
            current_version: expected_version + 1,
        })
    }

    async fn applied_debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<DebitRecord>, CollaboratorError> {
        self.inner.applied_debit(account_id, payment_id).await
    }
}

#[tokio::test]
async fn test_repeated_conflict_fails_payment() {
    let moving = MovingAccounts::default();
    let h = harness_with(
        ControllerConfig::default(),
        moving.inner.clone(),
        Arc::new(moving),
        RoleAuthorizer::permissive(),
    );
    let account = eur_account(&h, dec!(5000)).await;

    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    let err = h.controller.approve(payment.id, &bob()).await.unwrap_err();

    assert!(matches!(err, PaymentError::ConcurrencyConflict { .. }));
    let failed = h.controller.get(payment.id).await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(
        failed.reason,
        Some(StatusReason::ExecutionConflict { attempts: 2 })
    );

    let trail = actions(&h, payment.id).await;
    let conflicts = trail
        .iter()
        .filter(|a| **a == AuditAction::ExecutionConflict)
        .count();
    assert_eq!(conflicts, 2);
    assert_eq!(trail.last(), Some(&AuditAction::ExecutionFailed));
}

/// Payment store that loses the first commit to `Executed`
#[derive(Debug, Clone, Default)]
struct LosesExecutedCommit {
    inner: InMemoryPaymentStore,
    failed: Arc<AtomicBool>,
}

#[async_trait]
impl PaymentStore for LosesExecutedCommit {
    async fn create(&self, payment: &PaymentRequest, audit: AuditDraft) -> StoreResult<AuditEntry> {
        self.inner.create(payment, audit).await
    }

    async fn commit_transition(
        &self,
        expected: PaymentStatus,
        payment: &PaymentRequest,
        audit: AuditDraft,
    ) -> StoreResult<AuditEntry> {
        if payment.status == PaymentStatus::Executed && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.commit_transition(expected, payment, audit).await
    }

    async fn append_audit(&self, audit: AuditDraft) -> StoreResult<AuditEntry> {
        self.inner.append_audit(audit).await
    }

    async fn get(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRequest>> {
        self.inner.get(payment_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<PaymentRequest>> {
        self.inner.find_by_idempotency_key(key).await
    }

    async fn find_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRequest>> {
        self.inner.find_by_status(status, limit).await
    }

    async fn audit_trail(&self, payment_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_trail(payment_id).await
    }

    async fn audit_range(&self, after_sequence: i64, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_range(after_sequence, limit).await
    }
}

#[tokio::test]
async fn test_execution_after_lost_commit_debits_once() {
    let accounts = InMemoryAccountStore::new();
    let account = accounts
        .open(Currency::new("EUR").unwrap(), dec!(5000))
        .await;
    let controller = ApprovalController::new(
        Arc::new(LosesExecutedCommit::default()),
        Collaborators {
            accounts: Arc::new(accounts.clone()),
            authorizer: Arc::new(RoleAuthorizer::permissive()),
            watch_list: Arc::new(StaticWatchList::new("2026-10-01", Vec::new())),
            periods: Arc::new(PeriodLockRegistry::new()),
        },
        ControllerConfig::default(),
        ScreeningConfig::default(),
        ExportConfig::default(),
    );

    let payment = controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    let err = controller.approve(payment.id, &bob()).await.unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    assert_eq!(
        controller.get(payment.id).await.unwrap().status,
        PaymentStatus::Approved
    );
    assert_eq!(accounts.snapshot(account).await.unwrap().balance, dec!(4900));

    let executed = controller.execute(payment.id, &bob()).await.unwrap();
    assert_eq!(executed.status, PaymentStatus::Executed);
    assert_eq!(accounts.snapshot(account).await.unwrap().balance, dec!(4900));

    let trail = controller.audit_trail(payment.id).await.unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action(), AuditAction::Executed);
    assert_eq!(last.detail()["recovered"], json!(true));
}

// =========================================================================
// Rejection and expiry
// =========================================================================

#[tokio::test]
async fn test_reject_pending_payment() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    let rejected = h
        .controller
        .reject(payment.id, &bob(), "duplicate invoice")
        .await
        .unwrap();

    assert_eq!(rejected.status, PaymentStatus::Rejected);
    assert!(matches!(
        rejected.reason,
        Some(StatusReason::Cancelled { ref reason, .. }) if reason == "duplicate invoice"
    ));

    let err = h.controller.approve(payment.id, &bob()).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_reject_executed_payment_refused() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    h.controller.approve(payment.id, &bob()).await.unwrap();

    let err = h
        .controller
        .reject(payment.id, &bob(), "too late")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::InvalidTransition {
            from: PaymentStatus::Executed,
            to: PaymentStatus::Rejected,
            ..
        }
    ));
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::TransitionRefused)
    );
}

#[tokio::test]
async fn test_expire_pending_payments() {
    let h = harness_config(ControllerConfig {
        expiry: Some(ExpiryPolicy {
            pending_ttl: Duration::hours(24),
        }),
        ..ControllerConfig::default()
    });
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    let expired = h.controller.expire_pending(Utc::now()).await.unwrap();
    assert!(expired.is_empty());

    let expired = h
        .controller
        .expire_pending(Utc::now() + Duration::hours(25))
        .await
        .unwrap();
    assert_eq!(expired, vec![payment.id]);

    let stored = h.controller.get(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Rejected);
    assert!(matches!(stored.reason, Some(StatusReason::Expired { .. })));
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::Expired)
    );
}

#[tokio::test]
async fn test_expiry_disabled_without_policy() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    h.controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    let expired = h
        .controller
        .expire_pending(Utc::now() + Duration::days(365))
        .await
        .unwrap();
    assert!(expired.is_empty());
}

// =========================================================================
// Export
// =========================================================================

#[tokio::test]
async fn test_export_requires_executed() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new("k1"))
        .await
        .unwrap();

    let err = h.controller.export(payment.id, &bob()).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::ExportNotAllowed {
            status: PaymentStatus::PendingApproval,
            ..
        }
    ));
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::ExportRefused)
    );
}

#[tokio::test]
async fn test_export_executed_payment() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    let payment = h
        .controller
        .submit(&alice(), payload(account, dec!(1000)), IdempotencyKey::new("k1"))
        .await
        .unwrap();
    h.controller.approve(payment.id, &bob()).await.unwrap();

    let export = h.controller.export(payment.id, &bob()).await.unwrap();

    assert_eq!(export.number_of_transactions, 1);
    assert_eq!(export.control_sum, dec!(1000));
    assert!(export.xml.contains(&payment.end_to_end_id));
    assert!(export.xml.contains("GB29NWBK60161331926819"));
    assert_eq!(
        actions(&h, payment.id).await.last(),
        Some(&AuditAction::Exported)
    );
}

#[tokio::test]
async fn test_ledger_chain_valid_after_lifecycle() {
    let h = harness();
    let account = eur_account(&h, dec!(5000)).await;
    for key in ["k1", "k2", "k3"] {
        let payment = h
            .controller
            .submit(&alice(), payload(account, dec!(100)), IdempotencyKey::new(key))
            .await
            .unwrap();
        h.controller.approve(payment.id, &bob()).await.unwrap();
    }

    let result = h.controller.ledger().verify_chain().await.unwrap();
    assert!(result.is_valid);
    assert_eq!(result.entries_checked as usize, h.store.audit_len().await);
    assert!(h
        .store
        .find_by_status(PaymentStatus::Executed, 10)
        .await
        .unwrap()
        .len()
        == 3);
}
