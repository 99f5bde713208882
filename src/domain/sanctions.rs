//! Watch-list entries and screening results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::context::ActorId;

/// Source list an entry was published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListType {
    Sdn,
    Eu,
    Un,
    Ofsi,
    Internal,
}

/// A restricted party on the watch list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionsListEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<String>,
    /// ISO 3166 alpha-2 code; every payee in the country is a hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub list_type: ListType,
    #[serde(default)]
    pub list_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningDecision {
    Clear,
    Hold,
}

impl fmt::Display for ScreeningDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreeningDecision::Clear => f.write_str("clear"),
            ScreeningDecision::Hold => f.write_str("hold"),
        }
    }
}

/// Which part of an entry produced the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    Name,
    Alias,
    Bic,
    Country,
}

/// Best score of one watch-list entry against the payee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningMatch {
    pub entry_id: String,
    pub entry_name: String,
    pub matched_field: MatchedField,
    pub matched_text: String,
    pub score: f64,
}

/// Outcome of screening one payee against one list version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub payment_id: Uuid,
    pub list_version: String,
    pub screened_name: String,
    /// First entry in list order among those with the top score
    pub best_match: Option<ScreeningMatch>,
    /// Every entry sharing the top score, in list order
    pub tied_matches: Vec<ScreeningMatch>,
    pub score: f64,
    pub threshold: f64,
    pub decision: ScreeningDecision,
}

impl ScreeningResult {
    pub fn is_hold(&self) -> bool {
        self.decision == ScreeningDecision::Hold
    }

    pub fn best_entry_name(&self) -> &str {
        self.best_match
            .as_ref()
            .map(|m| m.entry_name.as_str())
            .unwrap_or("")
    }
}

/// Manual release of a screening hold.
///
/// Bound to the list version that produced the hold; a hit on a later
/// version needs a new review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanctionsOverride {
    pub actor: ActorId,
    pub justification: String,
    pub list_version: String,
    pub entry_id: Option<String>,
    pub overridden_at: DateTime<Utc>,
}
