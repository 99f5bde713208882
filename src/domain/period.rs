//! Accounting periods and period locks

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::ActorId;

/// Calendar month used for period closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub year: i32,
    pub month: u32,
}

impl AccountingPeriod {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Period containing `date`
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::containing(date) == *self
    }
}

impl fmt::Display for AccountingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Lock state of an accounting period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLock {
    pub period: AccountingPeriod,
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

impl PeriodLock {
    pub fn locked(period: AccountingPeriod, by: ActorId, at: DateTime<Utc>) -> Self {
        Self {
            period,
            locked: true,
            locked_by: Some(by),
            locked_at: Some(at),
        }
    }

    pub fn open(period: AccountingPeriod) -> Self {
        Self {
            period,
            locked: false,
            locked_by: None,
            locked_at: None,
        }
    }
}
