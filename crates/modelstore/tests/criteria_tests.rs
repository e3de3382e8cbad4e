//! Criteria, raw WHERE clauses, sorting and the lenient error mode

mod common;

use common::{memory_manager, Album, Episode};
use modelstore::{Criteria, PersistError, Value};
use rstest::rstest;

fn seed(manager: &modelstore::PersistenceManager) {
    for (title, key, season) in [
        ("Alpha", "a", 1),
        ("Beta", "b", 1),
        ("Gamma", "c", 2),
        ("Delta", "d", 3),
    ] {
        manager
            .insert::<Episode, _, _, _>([
                ("title", Value::from(title)),
                ("mediaKey", Value::from(key)),
                ("seasonNumber", Value::Int(season)),
            ])
            .unwrap()
            .unwrap();
    }
}

fn titles(records: &[modelstore::Record<Episode>]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get("title").and_then(|v| v.as_str().map(String::from)).unwrap_or_default())
        .collect()
}

// === Criteria ===

#[rstest]
#[case(Criteria::new().equals("seasonNumber", 1), 2)]
#[case(Criteria::new().not_equals("seasonNumber", 1), 2)]
#[case(Criteria::new().equals("seasonNumber", 1).equals("mediaKey", "b"), 1)]
#[case(Criteria::new().equals("title", "Nope"), 0)]
#[case(Criteria::new(), 4)]
fn test_fetch_matching_counts(#[case] criteria: Criteria, #[case] expected: usize) {
    let manager = memory_manager();
    seed(&manager);
    assert_eq!(manager.fetch_matching::<Episode>(&criteria).unwrap().len(), expected);
}

#[test]
fn test_not_prefix_from_pairs() {
    let manager = memory_manager();
    seed(&manager);
    let criteria: Criteria = [("<NOT>mediaKey", "a")].into_iter().collect();
    let found = manager.fetch_matching::<Episode>(&criteria).unwrap();
    assert_eq!(found.len(), 3);
    assert!(!titles(&found).contains(&"Alpha".to_string()));
}

#[test]
fn test_null_criteria() {
    let manager = memory_manager();
    seed(&manager);
    manager
        .insert::<Episode, _, _, _>([("title", "No key")])
        .unwrap();

    let missing = manager
        .fetch_matching::<Episode>(&Criteria::new().equals("mediaKey", Value::Null))
        .unwrap();
    assert_eq!(titles(&missing), vec!["No key"]);

    let present = manager
        .fetch_matching::<Episode>(&Criteria::new().not_equals("mediaKey", Value::Null))
        .unwrap();
    assert_eq!(present.len(), 4);
}

#[test]
fn test_quotes_in_values_are_escaped() {
    let manager = memory_manager();
    manager
        .insert::<Episode, _, _, _>([("title", "Rock 'n' Roll")])
        .unwrap();
    let found = manager
        .fetch_one::<Episode>(&Criteria::new().equals("title", "Rock 'n' Roll"))
        .unwrap();
    assert!(found.is_some());
}

#[test]
fn test_float32_values_match_their_stored_form() {
    let manager = memory_manager();
    manager
        .insert::<Episode, _, _, _>([("title", Value::from("Quiet")), ("volume", Value::Float(0.1))])
        .unwrap()
        .unwrap();
    manager
        .insert::<Episode, _, _, _>([("title", Value::from("Loud")), ("volume", Value::Float(0.9))])
        .unwrap();

    let found = manager
        .fetch_matching::<Episode>(&Criteria::new().equals("volume", 0.1))
        .unwrap();
    assert_eq!(titles(&found), vec!["Quiet"]);

    let others = manager
        .fetch_matching::<Episode>(&Criteria::new().not_equals("volume", 0.1))
        .unwrap();
    assert_eq!(titles(&others), vec!["Loud"]);
}

#[test]
fn test_bitfield_keys_are_rejected() {
    let manager = memory_manager();
    let err = manager
        .fetch_matching::<Album>(&Criteria::new().equals("autoDownload", true))
        .unwrap_err();
    assert!(matches!(err, PersistError::BitfieldCriterion { .. }));
}

// === Sorting and single-row fetches ===

#[test]
fn test_sorted_fetches() {
    let manager = memory_manager();
    seed(&manager);

    let by_title = manager
        .fetch_matching_sorted::<Episode>(&Criteria::new(), Some("TITLE DESC"))
        .unwrap();
    assert_eq!(titles(&by_title), vec!["Gamma", "Delta", "Beta", "Alpha"]);

    let season_one = manager
        .fetch_where::<Episode>("SEASON_NUMBER = 1", Some("ORDER BY TITLE"))
        .unwrap();
    assert_eq!(titles(&season_one), vec!["Alpha", "Beta"]);
}

#[test]
fn test_fetch_one_returns_first_of_many() {
    let manager = memory_manager();
    seed(&manager);
    let first = manager
        .fetch_one::<Episode>(&Criteria::new().equals("seasonNumber", 1))
        .unwrap()
        .unwrap();
    assert_eq!(first.get("title"), Some(Value::from("Alpha")));

    let last = manager
        .fetch_one_where::<Episode>("WHERE SEASON_NUMBER = 1", Some("ID DESC"))
        .unwrap()
        .unwrap();
    assert_eq!(last.get("title"), Some(Value::from("Beta")));
}

// === Error mode ===

#[test]
fn test_bad_where_clause_raises_by_default() {
    let manager = memory_manager();
    let err = manager
        .fetch_where::<Episode>("NO_SUCH_COLUMN = 1", None)
        .unwrap_err();
    assert!(matches!(err, PersistError::Execution(_)));
}

#[test]
fn test_bad_where_clause_is_swallowed_when_lenient() {
    let mut manager = memory_manager();
    manager.set_should_raise_exceptions(false);
    assert!(manager
        .fetch_where::<Episode>("NO_SUCH_COLUMN = 1", None)
        .unwrap()
        .is_empty());
    assert!(manager
        .fetch_one_where::<Episode>("NO_SUCH_COLUMN = 1", None)
        .unwrap()
        .is_none());

    // Caller mistakes are still reported
    assert!(manager
        .fetch_matching::<Album>(&Criteria::new().equals("wifiOnly", true))
        .is_err());
}
