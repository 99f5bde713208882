//! Properties of the payee similarity score

use proptest::prelude::*;
use treasury_core::domain::{ListType, SanctionsListEntry};
use treasury_core::screening::{score_entries, similarity_ratio};
use uuid::Uuid;

fn entries(names: &[String]) -> Vec<SanctionsListEntry> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| SanctionsListEntry {
            id: format!("E-{index}"),
            name: name.clone(),
            aliases: Vec::new(),
            bic: None,
            country: None,
            list_type: ListType::Internal,
            list_version: "v1".to_string(),
        })
        .collect()
}

proptest! {
    #[test]
    fn test_ratio_within_unit_interval(a in "[a-z ]{0,24}", b in "[a-z ]{0,24}") {
        let ratio = similarity_ratio(&a, &b);
        prop_assert!((0.0..=1.0).contains(&ratio));
    }

    #[test]
    fn test_ratio_is_deterministic(a in "\\PC{0,16}", b in "\\PC{0,16}") {
        prop_assert_eq!(similarity_ratio(&a, &b), similarity_ratio(&a, &b));
    }

    #[test]
    fn test_identical_names_score_one(a in "[a-z]{1,24}") {
        prop_assert_eq!(similarity_ratio(&a, &a), 1.0);
    }

    #[test]
    fn test_screening_is_deterministic(
        name in "[A-Za-z ]{1,20}",
        names in proptest::collection::vec("[A-Za-z ]{1,20}", 0..6),
    ) {
        let list = entries(&names);
        let first = score_entries(Uuid::nil(), &name, None, None, &list, "v1", 0.85);
        let second = score_entries(Uuid::nil(), &name, None, None, &list, "v1", 0.85);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.is_hold(), first.score >= 0.85 && !list.is_empty());
        for tied in &first.tied_matches {
            prop_assert_eq!(tied.score, first.score);
        }
    }
}

#[test]
fn test_known_scores() {
    assert!((similarity_ratio("vladmir putin", "vladimir putin") - 26.0 / 27.0).abs() < 1e-12);
    assert!((similarity_ratio("abc", "acb") - 4.0 / 6.0).abs() < 1e-12);
    assert_eq!(similarity_ratio("", ""), 1.0);
    assert_eq!(similarity_ratio("abc", ""), 0.0);
}
