//! Common test utilities

#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use treasury_core::collaborators::{
    AccountStore, InMemoryAccountStore, PeriodLockRegistry, RoleAuthorizer, StaticWatchList,
};
use treasury_core::domain::{ListType, SanctionsListEntry};
use treasury_core::export::ExportConfig;
use treasury_core::screening::ScreeningConfig;
use treasury_core::store::InMemoryPaymentStore;
use treasury_core::{
    ApprovalController, Collaborators, ControllerConfig, Currency, OperationContext,
    PaymentPayload,
};

pub const DEBTOR_IBAN: &str = "DE89370400440532013000";
pub const BENEFICIARY_IBAN: &str = "GB29NWBK60161331926819";
pub const BENEFICIARY_BIC: &str = "NWBKGB2L";

/// Controller wired to in-memory collaborators
pub struct TestHarness {
    pub controller: Arc<ApprovalController>,
    pub store: InMemoryPaymentStore,
    pub accounts: InMemoryAccountStore,
    pub authorizer: RoleAuthorizer,
    pub watch_list: StaticWatchList,
    pub periods: PeriodLockRegistry,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let store = InMemoryPaymentStore::new();
        let accounts = InMemoryAccountStore::new();
        let authorizer = RoleAuthorizer::permissive();
        let watch_list = StaticWatchList::new("2026-10-01", default_watch_list());
        let periods = PeriodLockRegistry::new();

        let collaborators = Collaborators {
            accounts: Arc::new(accounts.clone()),
            authorizer: Arc::new(authorizer.clone()),
            watch_list: Arc::new(watch_list.clone()),
            periods: Arc::new(periods.clone()),
        };
        let controller = Arc::new(ApprovalController::new(
            Arc::new(store.clone()),
            collaborators,
            config,
            ScreeningConfig::default(),
            ExportConfig::default(),
        ));

        Self {
            controller,
            store,
            accounts,
            authorizer,
            watch_list,
            periods,
        }
    }

    /// Open a EUR account with the given balance
    pub async fn open_account(&self, balance: Decimal) -> Uuid {
        self.accounts
            .open(Currency::new("EUR").unwrap(), balance)
            .await
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.accounts.snapshot(account_id).await.unwrap().balance
    }
}

pub fn default_watch_list() -> Vec<SanctionsListEntry> {
    vec![
        SanctionsListEntry {
            id: "SDN-1".to_string(),
            name: "Vladimir Putin".to_string(),
            aliases: vec!["Vladimir Vladimirovich Putin".to_string()],
            bic: None,
            country: None,
            list_type: ListType::Sdn,
            list_version: String::new(),
        },
        SanctionsListEntry {
            id: "EU-12".to_string(),
            name: "Bank Rossiya".to_string(),
            aliases: Vec::new(),
            bic: Some("ROSYRU2P".to_string()),
            country: None,
            list_type: ListType::Eu,
            list_version: String::new(),
        },
    ]
}

pub fn payment(account_id: Uuid, amount: Decimal) -> PaymentPayload {
    PaymentPayload {
        debit_account_id: account_id,
        debtor_iban: DEBTOR_IBAN.to_string(),
        beneficiary_name: "ACME Supplies GmbH".to_string(),
        beneficiary_iban: BENEFICIARY_IBAN.to_string(),
        beneficiary_bic: BENEFICIARY_BIC.to_string(),
        amount,
        currency: "EUR".to_string(),
        value_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        end_to_end_id: None,
        remittance_info: None,
        beneficiary_country: None,
    }
}

pub fn initiator() -> OperationContext {
    OperationContext::new("alice")
}

pub fn approver() -> OperationContext {
    OperationContext::new("bob")
}

/// Setup test database - apply the schema and truncate tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    pool.execute(include_str!("../../migrations/0001_payment_pipeline.sql"))
        .await
        .expect("Failed to apply schema");

    // The append-only trigger does not fire on TRUNCATE
    pool.execute("TRUNCATE TABLE audit_entries, payments, account_debits, accounts, period_locks")
        .await
        .expect("Failed to clean up DB");

    pool
}

/// Insert an account row and return its id
pub async fn seed_account(pool: &PgPool, currency: &str, balance: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO accounts (id, currency, balance, overdraft_limit, held, version)
        VALUES ($1, $2, $3, 0, 0, 1)
        "#,
    )
    .bind(id)
    .bind(currency)
    .bind(balance)
    .execute(pool)
    .await
    .expect("Failed to seed account");
    id
}
