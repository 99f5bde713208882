//! Domain module
//!
//! Core domain types of the payment pipeline.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod payment;
pub mod period;
pub mod sanctions;

pub use account::{AccountSnapshot, DebitRecord};
pub use amount::{Amount, AmountError, Currency, CurrencyError};
pub use context::{ActorId, OperationContext};
pub use error::PaymentError;
pub use payment::{
    IdempotencyKey, InvalidTransition, PaymentPayload, PaymentRequest, PaymentStatus,
    StatusReason,
};
pub use period::{AccountingPeriod, PeriodLock};
pub use sanctions::{
    ListType, MatchedField, SanctionsListEntry, SanctionsOverride, ScreeningDecision,
    ScreeningMatch, ScreeningResult,
};
