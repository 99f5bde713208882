//! Sanctions Screening
//!
//! Scores a payee against every watch-list entry and holds the payment when
//! the best score reaches the configured threshold. Scores depend only on the
//! payee and the list version, so results are memoized on that pair.

pub mod matcher;
pub mod normalize;

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::collaborators::{CollaboratorError, WatchListSource};
use crate::domain::{
    MatchedField, SanctionsListEntry, ScreeningDecision, ScreeningMatch, ScreeningResult,
};

pub use matcher::similarity_ratio;
pub use normalize::{normalize_name, normalize_text};

/// Default hold threshold
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// Screening parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ScreeningConfig {
    /// Scores at or above this are held
    pub threshold: f64,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

/// Memo key: normalized name, normalized BIC, country, list version
type MemoKey = (String, String, String, String);

/// Screens payees against the current watch list.
#[derive(Debug)]
pub struct SanctionsScreener {
    config: ScreeningConfig,
    watch_list: Arc<dyn WatchListSource>,
    memo: DashMap<MemoKey, ScreeningResult>,
}

impl SanctionsScreener {
    pub fn new(config: ScreeningConfig, watch_list: Arc<dyn WatchListSource>) -> Self {
        Self {
            config,
            watch_list,
            memo: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    /// Version the next screening would use
    pub async fn current_version(&self) -> Result<String, CollaboratorError> {
        self.watch_list.current_version().await
    }

    /// Screen against the current list version.
    pub async fn screen(
        &self,
        payment_id: Uuid,
        name: &str,
        bic: Option<&str>,
        country: Option<&str>,
    ) -> Result<ScreeningResult, CollaboratorError> {
        let version = self.watch_list.current_version().await?;
        self.screen_version(payment_id, name, bic, country, &version)
            .await
    }

    /// Screen against a specific list version.
    pub async fn screen_version(
        &self,
        payment_id: Uuid,
        name: &str,
        bic: Option<&str>,
        country: Option<&str>,
        list_version: &str,
    ) -> Result<ScreeningResult, CollaboratorError> {
        let key = (
            normalize_name(name),
            bic.map(normalize_bic).unwrap_or_default(),
            country.map(normalize_country).unwrap_or_default(),
            list_version.to_string(),
        );

        if let Some(cached) = self.memo.get(&key) {
            let mut result = cached.clone();
            result.payment_id = payment_id;
            return Ok(result);
        }

        let entries = self.watch_list.entries(list_version).await?;
        let result = score_entries(
            payment_id,
            name,
            bic,
            country,
            &entries,
            list_version,
            self.config.threshold,
        );

        tracing::debug!(
            payment_id = %payment_id,
            list_version = %list_version,
            score = result.score,
            decision = %result.decision,
            "Payee screened"
        );

        self.memo.insert(key, result.clone());
        Ok(result)
    }

    /// Drop memoized results for list versions other than `keep_version`
    pub fn retain_version(&self, keep_version: &str) {
        self.memo.retain(|(_, _, _, version), _| version == keep_version);
    }
}

fn normalize_bic(bic: &str) -> String {
    bic.trim().to_ascii_uppercase()
}

fn normalize_country(country: &str) -> String {
    country.trim().to_ascii_uppercase()
}

/// Score one payee against a list. Pure and deterministic.
pub fn score_entries(
    payment_id: Uuid,
    name: &str,
    bic: Option<&str>,
    country: Option<&str>,
    entries: &[SanctionsListEntry],
    list_version: &str,
    threshold: f64,
) -> ScreeningResult {
    let screened_name = normalize_name(name);
    let bic = bic.map(normalize_bic).filter(|b| !b.is_empty());
    let country = country.map(normalize_country).filter(|c| !c.is_empty());

    let matches: Vec<ScreeningMatch> = entries
        .iter()
        .map(|entry| score_entry(&screened_name, bic.as_deref(), country.as_deref(), entry))
        .collect();

    let score = matches.iter().map(|m| m.score).fold(0.0, f64::max);
    let tied_matches: Vec<ScreeningMatch> = if matches.is_empty() {
        Vec::new()
    } else {
        matches.into_iter().filter(|m| m.score == score).collect()
    };
    let best_match = tied_matches.first().cloned();

    let decision = if best_match.is_some() && score >= threshold {
        ScreeningDecision::Hold
    } else {
        ScreeningDecision::Clear
    };

    ScreeningResult {
        payment_id,
        list_version: list_version.to_string(),
        screened_name,
        best_match,
        tied_matches,
        score,
        threshold,
        decision,
    }
}

/// Best score of a single entry. Exact BIC or country hits score 1.0;
/// otherwise the best of the name and its aliases.
fn score_entry(
    name: &str,
    bic: Option<&str>,
    country: Option<&str>,
    entry: &SanctionsListEntry,
) -> ScreeningMatch {
    if let (Some(bic), Some(entry_bic)) = (bic, entry.bic.as_deref()) {
        if normalize_bic(entry_bic) == bic {
            return ScreeningMatch {
                entry_id: entry.id.clone(),
                entry_name: entry.name.clone(),
                matched_field: MatchedField::Bic,
                matched_text: entry_bic.to_string(),
                score: 1.0,
            };
        }
    }

    if let (Some(country), Some(entry_country)) = (country, entry.country.as_deref()) {
        if normalize_country(entry_country) == country {
            return ScreeningMatch {
                entry_id: entry.id.clone(),
                entry_name: entry.name.clone(),
                matched_field: MatchedField::Country,
                matched_text: entry_country.to_string(),
                score: 1.0,
            };
        }
    }

    let mut best = ScreeningMatch {
        entry_id: entry.id.clone(),
        entry_name: entry.name.clone(),
        matched_field: MatchedField::Name,
        matched_text: entry.name.clone(),
        score: similarity_ratio(name, &normalize_name(&entry.name)),
    };

    for alias in &entry.aliases {
        let score = similarity_ratio(name, &normalize_name(alias));
        if score > best.score {
            best.matched_field = MatchedField::Alias;
            best.matched_text = alias.clone();
            best.score = score;
        }
    }

    best
}
