//! Funds check against an account snapshot

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{AccountSnapshot, Amount, Currency};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FundsError {
    #[error("Currency mismatch: account {account_currency}, payment {payment_currency}")]
    CurrencyMismatch {
        account_currency: String,
        payment_currency: String,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },
}

/// Compares a requested amount with the available balance.
///
/// Nothing is reserved: the check is repeated under the account lock at
/// execution time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FundsValidator;

impl FundsValidator {
    pub fn check(
        &self,
        account: &AccountSnapshot,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(), FundsError> {
        if &account.currency != currency {
            return Err(FundsError::CurrencyMismatch {
                account_currency: account.currency.to_string(),
                payment_currency: currency.to_string(),
            });
        }

        let available = account.available();
        if available < amount.value() {
            return Err(FundsError::InsufficientFunds {
                required: amount.value(),
                available,
            });
        }

        Ok(())
    }
}
