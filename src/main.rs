//! treasury_core - payment authorization pipeline service
//!
//! Connects the approval controller to Postgres, verifies the audit chain on
//! start-up and runs the maintenance jobs until shutdown.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use treasury_core::approval::{ApprovalController, Collaborators};
use treasury_core::collaborators::{
    PgAccountStore, PgPeriodLockCalendar, RoleAuthorizer, StaticWatchList,
};
use treasury_core::jobs::{self, JobScheduler, JobSchedulerConfig, SchedulerExit};
use treasury_core::store::PgPaymentStore;
use treasury_core::{db, AppError, Config};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treasury_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the watch list, or start with an empty one
fn load_watch_list(config: &Config) -> anyhow::Result<StaticWatchList> {
    match &config.watch_list_path {
        Some(path) => {
            let list = StaticWatchList::from_json_file(path)?;
            tracing::info!(path = %path.display(), "Watch list loaded");
            Ok(list)
        }
        None => {
            tracing::warn!("WATCH_LIST_PATH not set; screening against an empty watch list");
            Ok(StaticWatchList::new("empty", Vec::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;

    tracing::info!(environment = %config.environment, "Starting treasury_core");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if let Some(table) = db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(AppError::SchemaIncomplete(table.to_string()).into());
    }
    tracing::info!("Database connected successfully");

    if config.approval_signer.is_none() {
        tracing::warn!(
            "APPROVAL_SIGNING_KEY not set; approvals signed before a restart will not verify"
        );
    }

    let collaborators = Collaborators {
        accounts: Arc::new(PgAccountStore::new(pool.clone())),
        // Grants are managed by the embedding service
        authorizer: Arc::new(RoleAuthorizer::new()),
        watch_list: Arc::new(load_watch_list(&config)?),
        periods: Arc::new(PgPeriodLockCalendar::new(pool.clone())),
    };

    let controller = Arc::new(ApprovalController::new(
        Arc::new(PgPaymentStore::new(pool.clone())),
        collaborators,
        config.controller(),
        config.screening(),
        config.export(),
    ));

    // Refuse to start on a broken chain
    let chain = jobs::verify_audit_chain(&controller).await?;
    tracing::info!(entries = chain.entries_checked, "Audit chain intact");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = JobScheduler::with_config(
        controller.clone(),
        JobSchedulerConfig {
            audit_verify_interval: config.audit_verify_interval,
            expiry_sweep_interval: config.expiry_sweep_interval,
            ..JobSchedulerConfig::default()
        },
    );
    let mut handle = scheduler.start(shutdown_rx);

    let exit = tokio::select! {
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            (&mut handle).await?
        }
        exit = &mut handle => exit?,
    };

    tracing::info!("Shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    match exit {
        SchedulerExit::Shutdown => Ok(()),
        SchedulerExit::IntegrityViolation(detail) => {
            tracing::error!(detail = %detail, "Stopped after audit integrity violation");
            Err(anyhow::anyhow!("audit integrity violation: {detail}"))
        }
    }
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
