//! Approval Controller
//!
//! State machine that takes a payment instruction from submission through
//! validation, sanctions screening and four-eyes approval to execution.
//! Every transition is committed together with its audit entry.

mod controller;
mod execution;

#[cfg(test)]
mod tests;

use chrono::Duration;
use std::sync::Arc;

use crate::collaborators::{AccountStore, Authorizer, PeriodLockCalendar, WatchListSource};
use crate::signing::ApprovalSigner;

pub use controller::ApprovalController;

/// How long a payment may wait for approval before `expire_pending`
/// rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub pending_ttl: Duration,
}

/// Controller behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Execute immediately after a successful approval
    pub auto_execute: bool,
    /// No expiry when unset
    pub expiry: Option<ExpiryPolicy>,
    /// Maximum payments expired per sweep
    pub expiry_batch_size: i64,
    /// Signs approvals; execution only accepts this key's signatures
    pub signer: ApprovalSigner,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            auto_execute: true,
            expiry: None,
            expiry_batch_size: 500,
            signer: ApprovalSigner::generate(),
        }
    }
}

/// External systems the controller consults
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub watch_list: Arc<dyn WatchListSource>,
    pub periods: Arc<dyn PeriodLockCalendar>,
}
