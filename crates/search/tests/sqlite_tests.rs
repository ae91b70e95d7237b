//! SQLite backend integration tests.
//!
//! These tests run each parameter kind, includes, `everything` and the
//! JSON translator end to end against the seeded store.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use helios_search::backends::sqlite::SqliteBackend;
use helios_search::config::SearchConfig;
use helios_search::core::{EntityTranslator, FhirJsonTranslator};
use helios_search::engine::SearchEngine;
use helios_search::error::{SearchError, StorageError};
use helios_search::request::SearchRequest;
use helios_search::types::{
    DateRangeValue, HandlerKey, IncludeDirective, QuantityComparator, QuantityValue,
    ReferenceValue, ResourceType, SearchParameterMap, StringValue, TokenValue, ValueGroup,
};

use common::{ALICE, MARY, VOIDED, engine, seed, seeded_backend, uuids, uuids_of};

fn search(resource_type: ResourceType, map: SearchParameterMap) -> Vec<String> {
    uuids(&engine().search(resource_type, map).all_resources().unwrap())
}

// ============================================================================
// Parameter kinds
// ============================================================================

#[test]
fn test_gender_words_map_to_stored_codes() {
    let map = SearchParameterMap::new()
        .with(HandlerKey::Gender, ValueGroup::single(TokenValue::code("female")));
    assert_eq!(search(ResourceType::Patient, map), vec![MARY, ALICE]);

    let malformed = SearchParameterMap::new()
        .with(HandlerKey::Gender, ValueGroup::single(TokenValue::code("robot")));
    assert!(search(ResourceType::Patient, malformed).is_empty());
}

#[test]
fn test_name_prefix_and_composite_name() {
    let prefix = SearchParameterMap::new()
        .with(HandlerKey::Name, ValueGroup::single(StringValue::prefix("che")));
    assert_eq!(search(ResourceType::Patient, prefix), vec![MARY]);

    let full = SearchParameterMap::new()
        .with(HandlerKey::Name, ValueGroup::single(StringValue::prefix("Mary Che")));
    assert_eq!(search(ResourceType::Patient, full), vec![MARY]);

    let exact = SearchParameterMap::new().with_qualified(
        HandlerKey::Name,
        "family",
        ValueGroup::single(StringValue::exact("chebet")),
    );
    assert!(search(ResourceType::Patient, exact).is_empty());
}

#[test]
fn test_address_qualifiers() {
    let map = SearchParameterMap::new().with_qualified(
        HandlerKey::Address,
        "city",
        ValueGroup::single(StringValue::prefix("eld")),
    );
    assert_eq!(search(ResourceType::Patient, map), vec![MARY, ALICE]);

    let contains = SearchParameterMap::new().with_qualified(
        HandlerKey::Address,
        "state",
        ValueGroup::single(StringValue::contains("gish")),
    );
    assert_eq!(search(ResourceType::Patient, contains), vec![MARY]);
}

#[test]
fn test_identifier_with_type_system() {
    let map = SearchParameterMap::new().with(
        HandlerKey::Identifier,
        ValueGroup::single(TokenValue::with_system("OpenMRS ID", "MRN-2")),
    );
    assert_eq!(search(ResourceType::Patient, map), vec!["pat-john"]);

    let wrong_type = SearchParameterMap::new().with(
        HandlerKey::Identifier,
        ValueGroup::single(TokenValue::with_system("National ID", "MRN-2")),
    );
    assert!(search(ResourceType::Patient, wrong_type).is_empty());
}

#[test]
fn test_voided_rows_never_match() {
    let map = SearchParameterMap::new().with_qualified(
        HandlerKey::Common,
        "_id",
        ValueGroup::single(TokenValue::code(VOIDED)),
    );
    assert!(search(ResourceType::Patient, map).is_empty());

    let everyone = search(ResourceType::Patient, SearchParameterMap::new());
    assert_eq!(everyone.len(), 3);
}

#[test]
fn test_quantity_comparators_and_units() {
    let gt = SearchParameterMap::new().with(
        HandlerKey::Quantity,
        ValueGroup::single(QuantityValue::new("99").with_comparator(QuantityComparator::Gt)),
    );
    assert_eq!(search(ResourceType::Observation, gt), vec!["obs-9", "obs-10"]);

    let in_kg = SearchParameterMap::new().with(
        HandlerKey::Quantity,
        ValueGroup::single(
            QuantityValue::new("99")
                .with_comparator(QuantityComparator::Gt)
                .with_unit("KG"),
        ),
    );
    assert_eq!(search(ResourceType::Observation, in_kg), vec!["obs-10"]);

    let approximately = SearchParameterMap::new().with(
        HandlerKey::Quantity,
        ValueGroup::single(QuantityValue::parse("ap70")),
    );
    assert_eq!(
        search(ResourceType::Observation, approximately),
        vec!["obs-4", "obs-5", "obs-6", "obs-7", "obs-8", "obs-11"]
    );

    let malformed = SearchParameterMap::new()
        .with(HandlerKey::Quantity, ValueGroup::single(QuantityValue::new("heavy")));
    assert!(search(ResourceType::Observation, malformed).is_empty());
}

#[test]
fn test_open_date_ranges() {
    let from = SearchParameterMap::new().with(
        HandlerKey::DateRange,
        ValueGroup::single(DateRangeValue::from("2010")),
    );
    assert_eq!(search(ResourceType::Observation, from), vec!["obs-10", "obs-11"]);

    let until = SearchParameterMap::new().with(
        HandlerKey::DateRange,
        ValueGroup::single(DateRangeValue::until("2008-08")),
    );
    assert_eq!(search(ResourceType::Observation, until), vec!["obs-1", "obs-2"]);

    let within = SearchParameterMap::new().with(
        HandlerKey::DateRange,
        ValueGroup::single(DateRangeValue::between("2009-01", "2009-02")),
    );
    assert_eq!(search(ResourceType::Observation, within), vec!["obs-3", "obs-4"]);
}

#[test]
fn test_status_and_category_ignore_case() {
    let map = SearchParameterMap::new()
        .with(HandlerKey::Status, ValueGroup::single(TokenValue::code("PRELIMINARY")))
        .with(HandlerKey::Category, ValueGroup::single(TokenValue::code("Vital-Signs")));
    assert_eq!(search(ResourceType::Observation, map), vec!["obs-11"]);
}

#[test]
fn test_fulfiller_status_normalization() {
    let map = SearchParameterMap::new().with(
        HandlerKey::FulfillerStatus,
        ValueGroup::single(TokenValue::code("in-progress")),
    );
    assert_eq!(search(ResourceType::ServiceRequest, map), vec!["sr-mary"]);
}

#[test]
fn test_chained_string_and_typed_reference() {
    let chained = SearchParameterMap::new().with(
        HandlerKey::PatientReference,
        ValueGroup::single(ReferenceValue::chained("family", "kam")),
    );
    assert_eq!(search(ResourceType::Observation, chained), vec!["obs-10", "obs-11"]);

    let typed = SearchParameterMap::new().with(
        HandlerKey::EncounterReference,
        ValueGroup::single(ReferenceValue::parse("Encounter/enc-mary")),
    );
    assert_eq!(search(ResourceType::Observation, typed), vec!["obs-1", "obs-2"]);

    let mistyped = SearchParameterMap::new().with(
        HandlerKey::EncounterReference,
        ValueGroup::single(ReferenceValue::parse("Patient/enc-mary")),
    );
    assert!(search(ResourceType::Observation, mistyped).is_empty());

    let unknown_chain = SearchParameterMap::new().with(
        HandlerKey::PatientReference,
        ValueGroup::single(ReferenceValue::chained("shoe-size", "42")),
    );
    assert!(search(ResourceType::Observation, unknown_chain).is_empty());
}

#[test]
fn test_has_member_follows_group_link() {
    let map = SearchParameterMap::new().with(
        HandlerKey::HasMember,
        ValueGroup::single(ReferenceValue::id("obs-2")),
    );
    assert_eq!(search(ResourceType::Observation, map), vec!["obs-1"]);
}

#[test]
fn test_unknown_parameter_is_ignored() {
    let map = SearchParameterMap::new().with_qualified(
        HandlerKey::Status,
        "shoe-size",
        ValueGroup::single(TokenValue::code("42")),
    );
    assert_eq!(search(ResourceType::Patient, map).len(), 3);
}

// ============================================================================
// Includes and everything
// ============================================================================

#[test]
fn test_forward_include_is_deduplicated() {
    let map = SearchParameterMap::new()
        .with(HandlerKey::PatientReference, ValueGroup::single(ReferenceValue::id(MARY)))
        .with_include(IncludeDirective::include(ResourceType::Observation, "patient"))
        .with_include(IncludeDirective::include(ResourceType::Observation, "encounter"));
    let results = engine().search(ResourceType::Observation, map).all_resources().unwrap();

    assert_eq!(uuids_of(&results, ResourceType::Observation).len(), 9);
    assert_eq!(uuids_of(&results, ResourceType::Patient), vec![MARY]);
    assert_eq!(uuids_of(&results, ResourceType::Encounter), vec!["enc-mary"]);
    let tail: Vec<_> = uuids(&results).split_off(9);
    assert_eq!(tail, vec![MARY, "enc-mary"]);
}

#[test]
fn test_patient_everything() {
    let engine = engine();
    let results = engine.everything(ResourceType::Patient, MARY).unwrap();
    assert_eq!(results.size().unwrap(), 1);

    let all = results.all_resources().unwrap();
    assert_eq!(all[0].uuid(), MARY);
    assert_eq!(uuids_of(&all, ResourceType::Observation).len(), 9);
    assert_eq!(uuids_of(&all, ResourceType::Encounter), vec!["enc-mary"]);
    assert_eq!(uuids_of(&all, ResourceType::ServiceRequest), vec!["sr-mary"]);
    assert_eq!(all.len(), 12);
}

#[test]
fn test_encounter_everything_includes_participants() {
    let all = engine()
        .everything(ResourceType::Encounter, "enc-john")
        .unwrap()
        .all_resources()
        .unwrap();
    assert_eq!(
        uuids(&all),
        vec!["enc-john", "pat-john", "prac-1", "obs-10"]
    );
}

#[test]
fn test_everything_on_voided_root_is_not_found() {
    let err = engine().everything(ResourceType::Patient, VOIDED).unwrap_err();
    assert!(matches!(err, StorageError::Search(SearchError::NotFound { .. })));
}

// ============================================================================
// Store behaviour
// ============================================================================

#[test]
fn test_store_failure_is_distinct_from_no_matches() {
    let backend = SqliteBackend::in_memory().unwrap();
    let engine = SearchEngine::new(backend, EntityTranslator, SearchConfig::default()).unwrap();
    let err = engine
        .search(ResourceType::Patient, SearchParameterMap::new())
        .size()
        .unwrap_err();
    assert!(err.is_backend());
}

#[test]
fn test_explain_renders_bound_sql() {
    let map = SearchParameterMap::new()
        .with(HandlerKey::Gender, ValueGroup::single(TokenValue::code("male")));
    let explanation = engine().explain(ResourceType::Patient, &map).unwrap();
    assert!(explanation.satisfiable);
    let count = explanation.count.expect("count query");
    assert!(count.sql.starts_with("SELECT COUNT(DISTINCT t0.patient_id) FROM patient t0"));
    assert!(count.params.iter().any(|p| *p == helios_search::search::SqlParam::string("M")));
}

#[test]
fn test_request_file_round_trip_through_engine() {
    let request = SearchRequest::from_json(
        r#"{
            "resource_type": "Observation",
            "parameters": {
                "entries": [{
                    "handler": "coded",
                    "group": { "kind": "token", "values": [[{ "system": "http://loinc.org", "code": "8302-2" }]] }
                }]
            }
        }"#,
    )
    .unwrap();
    let engine = engine();
    let results = engine.search(request.resource_type, request.parameters);
    assert_eq!(uuids(&results.all_resources().unwrap()), vec!["obs-9"]);
}

#[test]
fn test_json_translator_renders_codings() {
    let config = SearchConfig::default();
    let engine =
        SearchEngine::new(seeded_backend(), FhirJsonTranslator::new(&config), config).unwrap();
    let map = SearchParameterMap::new()
        .with_qualified(HandlerKey::Common, "_id", ValueGroup::single(TokenValue::code("obs-10")));
    let resources = engine.search(ResourceType::Observation, map).all_resources().unwrap();

    assert_eq!(resources.len(), 1);
    let obs = &resources[0];
    assert_eq!(obs["subject"]["reference"], "Patient/pat-john");
    assert_eq!(obs["encounter"]["reference"], "Encounter/enc-john");
    assert_eq!(obs["valueQuantity"]["value"], 100.0);
    let systems: Vec<_> = obs["code"]["coding"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["system"].as_str())
        .collect();
    assert_eq!(systems, vec!["http://loinc.org", "https://cielterminology.org"]);
}

#[test]
fn test_file_backed_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinical.db");
    {
        let backend = SqliteBackend::open(&path).unwrap();
        seed(&backend);
    }

    let backend = SqliteBackend::open(&path).unwrap();
    backend.init_schema().unwrap();
    let engine = SearchEngine::new(backend, EntityTranslator, SearchConfig::default()).unwrap();
    let results = engine.search(ResourceType::Observation, SearchParameterMap::new());
    assert_eq!(results.size().unwrap(), 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pages_from_shared_engine() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::open(dir.path().join("clinical.db")).unwrap();
    seed(&backend);
    let engine = Arc::new(
        SearchEngine::new(backend, EntityTranslator, SearchConfig::default()).unwrap(),
    );

    let mut handles = Vec::new();
    for start in (0..11).step_by(3) {
        let engine = Arc::clone(&engine);
        handles.push(tokio::task::spawn_blocking(move || {
            let coded = SearchParameterMap::new()
                .with(HandlerKey::Coded, ValueGroup::single(TokenValue::code("5089")));
            let results = engine.search(ResourceType::Observation, coded);
            (start, uuids(&results.page(start, start + 3).unwrap()))
        }));
    }

    let mut pages = Vec::new();
    for handle in handles {
        pages.push(handle.await.unwrap());
    }
    pages.sort();
    let combined: Vec<String> = pages.into_iter().flat_map(|(_, page)| page).collect();

    let expected = uuids(
        &engine
            .search(
                ResourceType::Observation,
                SearchParameterMap::new()
                    .with(HandlerKey::Coded, ValueGroup::single(TokenValue::code("5089"))),
            )
            .all_resources()
            .unwrap(),
    );
    assert_eq!(combined, expected);
    assert_eq!(combined.len(), 10);
}
