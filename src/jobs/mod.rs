//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks: verifying the audit chain,
//! expiring payments that waited too long for approval, and trimming the
//! in-process caches.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::approval::ApprovalController;
use crate::domain::PaymentError;
use crate::ledger::ChainVerificationResult;

// =========================================================================
// Audit Chain Verification Job
// =========================================================================

/// Walk the whole audit chain and fail if any link is broken
pub async fn verify_audit_chain(
    controller: &ApprovalController,
) -> Result<ChainVerificationResult, JobError> {
    let result = controller.ledger().verify_chain().await?;

    if !result.is_valid {
        tracing::error!(
            first_invalid_sequence = ?result.first_invalid_sequence,
            expected_hash = ?result.expected_hash,
            actual_hash = ?result.actual_hash,
            entries_checked = result.entries_checked,
            "Audit chain verification failed"
        );
        return Err(JobError::IntegrityViolation {
            sequence: result.first_invalid_sequence,
            entries_checked: result.entries_checked,
        });
    }

    tracing::debug!(
        entries_checked = result.entries_checked,
        "Audit chain verified"
    );
    Ok(result)
}

// =========================================================================
// Pending Approval Expiry Job
// =========================================================================

/// Reject payments whose approval window has passed
pub async fn expire_pending_approvals(
    controller: &ApprovalController,
    now: DateTime<Utc>,
) -> Result<usize, JobError> {
    let expired = controller.expire_pending(now).await?;
    Ok(expired.len())
}

// =========================================================================
// Housekeeping Job
// =========================================================================

/// Drop idle account locks and stale screening results
pub async fn housekeeping(controller: &ApprovalController) -> Result<usize, JobError> {
    let pruned = controller.coordinator().prune_idle();
    controller.trim_screening_cache().await?;

    if pruned > 0 {
        tracing::debug!(pruned = pruned, "Pruned idle account locks");
    }
    Ok(pruned)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for audit chain verification (default: 5 minutes)
    pub audit_verify_interval: Duration,
    /// Interval for pending approval expiry (default: 1 minute)
    pub expiry_sweep_interval: Duration,
    /// Interval for cache housekeeping (default: 10 minutes)
    pub housekeeping_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            audit_verify_interval: Duration::from_secs(300),
            expiry_sweep_interval: Duration::from_secs(60),
            housekeeping_interval: Duration::from_secs(600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    controller: Arc<ApprovalController>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(controller: Arc<ApprovalController>) -> Self {
        Self {
            controller,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(controller: Arc<ApprovalController>, config: JobSchedulerConfig) -> Self {
        Self { controller, config }
    }

    /// Start the job scheduler in the background
    ///
    /// The loop ends when `shutdown` flips to `true`, or on its own after an
    /// audit chain break, which leaves `integrity_lost` set in the report.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<SchedulerExit> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run the scheduler loop
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SchedulerExit {
        tracing::info!("Job scheduler started");

        let mut audit_interval = interval(self.config.audit_verify_interval);
        let mut expiry_interval = interval(self.config.expiry_sweep_interval);
        let mut housekeeping_interval = interval(self.config.housekeeping_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("Job scheduler stopping");
                    return SchedulerExit::Shutdown;
                }
                _ = audit_interval.tick() => {
                    match verify_audit_chain(&self.controller).await {
                        Ok(_) => {}
                        Err(e) if e.is_integrity_violation() => {
                            return SchedulerExit::IntegrityViolation(e.to_string());
                        }
                        Err(e) => tracing::error!(error = %e, "Audit chain verification failed to run"),
                    }
                }
                _ = expiry_interval.tick() => {
                    if let Err(e) = expire_pending_approvals(&self.controller, Utc::now()).await {
                        tracing::error!(error = %e, "Pending approval expiry failed");
                    }
                }
                _ = housekeeping_interval.tick() => {
                    if let Err(e) = housekeeping(&self.controller).await {
                        tracing::error!(error = %e, "Housekeeping failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match verify_audit_chain(&self.controller).await {
            Ok(result) => report.chain = Some(result),
            Err(e) => {
                report.integrity_lost = e.is_integrity_violation();
                report.errors.push(format!("Audit verification: {}", e));
            }
        }

        match expire_pending_approvals(&self.controller, Utc::now()).await {
            Ok(count) => report.payments_expired = count,
            Err(e) => report.errors.push(format!("Pending expiry: {}", e)),
        }

        match housekeeping(&self.controller).await {
            Ok(count) => report.account_locks_pruned = count,
            Err(e) => report.errors.push(format!("Housekeeping: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Why the scheduler loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerExit {
    Shutdown,
    IntegrityViolation(String),
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub chain: Option<ChainVerificationResult>,
    pub integrity_lost: bool,
    pub payments_expired: usize,
    pub account_locks_pruned: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Audit chain broken at sequence {sequence:?} after {entries_checked} entries")]
    IntegrityViolation {
        sequence: Option<i64>,
        entries_checked: u64,
    },
}

impl JobError {
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            JobError::IntegrityViolation { .. } => true,
            JobError::Payment(e) => e.is_fatal(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
