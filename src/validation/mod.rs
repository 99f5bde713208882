//! Synchronous validation performed at submission

pub mod funds;
pub mod identifiers;

pub use funds::{FundsError, FundsValidator};
pub use identifiers::{IdentifierError, IdentifierValidator};
