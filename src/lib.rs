//! treasury_core Library
//!
//! Payment authorization pipeline: identifier and funds validation, sanctions
//! screening, four-eyes approval, serialized execution per account, a
//! hash-chained audit ledger and pain.001 export.

pub mod approval;
pub mod collaborators;
pub mod coordinator;
pub mod domain;
pub mod export;
pub mod jobs;
pub mod ledger;
pub mod screening;
pub mod signing;
pub mod store;
pub mod validation;

pub mod config;
pub mod db;
mod error;

pub use approval::{ApprovalController, Collaborators, ControllerConfig, ExpiryPolicy};
pub use config::Config;
pub use domain::{
    ActorId, Amount, AmountError, Currency, IdempotencyKey, OperationContext, PaymentError,
    PaymentPayload, PaymentRequest, PaymentStatus,
};
pub use error::{AppError, AppResult};
pub use ledger::{AuditAction, AuditEntry, ChainVerificationResult};
