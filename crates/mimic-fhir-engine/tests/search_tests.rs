//! End-to-end search tests over NDJSON fixtures.

mod common;

use std::sync::Arc;

use mimic_fhir::{ReferenceKind, ResourceType, SearchQuery};
use mimic_fhir_engine::{
    AccessPath, Dataset, DatasetLayout, EngineError, LoadError, QueryEngine,
};

fn open_engine() -> (tempfile::TempDir, QueryEngine) {
    let dir = common::mimic_fixture();
    let dataset = Dataset::open(&DatasetLayout::new(dir.path()));
    (dir, QueryEngine::new(Arc::new(dataset)))
}

fn search_ids(engine: &QueryEngine, rt: ResourceType, params: &[(&str, &str)]) -> Vec<String> {
    let query = SearchQuery::parse(rt, params.iter().copied());
    engine
        .search(&query)
        .unwrap()
        .result
        .ids()
        .into_iter()
        .map(String::from)
        .collect()
}

#[test]
fn test_subject_search_returns_events_in_file_order() {
    let (_dir, engine) = open_engine();
    let query = SearchQuery::parse(ResourceType::Observation, [("subject", "Patient/p1")]);
    let outcome = engine.search(&query).unwrap();

    assert_eq!(outcome.result.ids(), vec!["e1", "e2"]);
    assert_eq!(outcome.result.total, 2);
    assert!(engine.explain(&query).unwrap().uses_index());
}

#[test]
fn test_search_is_idempotent() {
    let (_dir, engine) = open_engine();
    let query = SearchQuery::parse(
        ResourceType::Observation,
        [("patient", "p2"), ("category", "laboratory")],
    );
    let first = engine.search(&query).unwrap();
    let second = engine.search(&query).unwrap();
    assert_eq!(first.result, second.result);
    assert_eq!(first.result.ids(), vec!["o-p2-1", "o-p2-2"]);
}

#[test]
fn test_files_concatenate_in_layout_order() {
    let (_dir, engine) = open_engine();
    assert_eq!(
        search_ids(&engine, ResourceType::Encounter, &[]),
        vec!["enc1", "enc2", "enc3"]
    );
    assert_eq!(
        search_ids(&engine, ResourceType::Observation, &[("subject", "p2")]),
        vec!["o-p2-1", "o-p2-2", "o-p2-3"]
    );
}

#[test]
fn test_paging_slices_concatenate() {
    let (_dir, engine) = open_engine();
    let all = search_ids(&engine, ResourceType::Observation, &[]);
    assert_eq!(all.len(), 5);

    let mut paged = Vec::new();
    for offset in (0..all.len()).step_by(2) {
        let offset = offset.to_string();
        paged.extend(search_ids(
            &engine,
            ResourceType::Observation,
            &[("_count", "2"), ("_offset", offset.as_str())],
        ));
    }
    assert_eq!(paged, all);
}

#[test]
fn test_index_matches_full_scan() {
    let dir = common::mimic_fixture();
    common::write_ndjson(
        dir.path(),
        "MimicObservationChartevents.ndjson",
        &[common::observation("o-ghost", "ghost", "vital-signs", "2180-08-04T08:00:00-04:00", None)],
    );
    let engine = QueryEngine::new(Arc::new(Dataset::open(&DatasetLayout::new(dir.path()))));
    let dataset = engine.dataset();
    assert_eq!(dataset.stats().index.dangling_edges, 1);

    for source in [ResourceType::Observation, ResourceType::Encounter, ResourceType::Condition] {
        for patient in ["p1", "p2", "p3", "ghost"] {
            let indexed = dataset.lookup(source, ResourceType::Patient, patient, ReferenceKind::Subject);
            let scanned: Vec<&str> = dataset
                .store()
                .all(source)
                .unwrap()
                .filter(|r| {
                    r.references_of(ReferenceKind::Subject)
                        .any(|reference| reference.target_id == patient)
                })
                .map(|r| r.id())
                .collect();
            assert_eq!(indexed, scanned, "{source} subject={patient}");
        }
    }

    let query = SearchQuery::parse(ResourceType::Observation, [("subject", "Patient/ghost")]);
    assert!(engine.explain(&query).unwrap().uses_index());
    assert_eq!(engine.search(&query).unwrap().result.ids(), vec!["o-ghost"]);
}

#[test]
fn test_token_and_date_filters() {
    let (_dir, engine) = open_engine();
    assert_eq!(
        search_ids(&engine, ResourceType::Observation, &[("category", "vital-signs")]),
        vec!["o-p2-3"]
    );
    assert_eq!(
        search_ids(
            &engine,
            ResourceType::Observation,
            &[("date", "2180-07-21"), ("subject", "p1")]
        ),
        vec!["e1"]
    );
    assert_eq!(
        search_ids(&engine, ResourceType::Encounter, &[("class", "EMER,IMP")]),
        vec!["enc1", "enc3"]
    );
    assert_eq!(
        search_ids(&engine, ResourceType::Patient, &[("gender", "female"), ("birthdate", "ge2105")]),
        vec!["p3"]
    );
}

#[test]
fn test_unknown_param_ignored_and_bad_value_empty() {
    let (_dir, engine) = open_engine();
    assert_eq!(
        search_ids(&engine, ResourceType::Patient, &[("_elements", "id"), ("_id", "p1")]),
        vec!["p1"]
    );

    let query = SearchQuery::parse(ResourceType::Observation, [("subject", "Group/g1")]);
    let outcome = engine.search(&query).unwrap();
    assert_eq!(outcome.result.total, 0);
    assert_eq!(engine.explain(&query).unwrap().access, AccessPath::Empty);
}

#[test]
fn test_missing_file_makes_type_unavailable() {
    let (dir, engine) = open_engine();
    let store = engine.dataset().store();

    assert!(!store.is_available(ResourceType::Procedure));
    assert!(matches!(
        store.load_error(ResourceType::Procedure),
        Some(LoadError::MissingSource { .. })
    ));
    assert!(matches!(
        engine.search(&SearchQuery::new(ResourceType::Procedure)),
        Err(EngineError::Unavailable(ResourceType::Procedure))
    ));
    assert!(store.is_available(ResourceType::Patient));

    // Removing one Observation file takes only Observation offline.
    std::fs::remove_file(dir.path().join("MimicObservationMicroSusc.ndjson")).unwrap();
    let reloaded = Dataset::open(&DatasetLayout::new(dir.path()));
    assert!(!reloaded.store().is_available(ResourceType::Observation));
    assert!(reloaded.store().is_available(ResourceType::Encounter));
}

#[test]
fn test_unloaded_reference_target_falls_back_to_scan() {
    let (dir, _engine) = open_engine();
    let layout = DatasetLayout::new(dir.path()).without(ResourceType::Patient);
    let engine = QueryEngine::new(Arc::new(Dataset::open(&layout)));

    let query = SearchQuery::parse(ResourceType::Observation, [("subject", "Patient/p1")]);
    assert_eq!(engine.explain(&query).unwrap().access, AccessPath::FullScan);
    assert_eq!(engine.search(&query).unwrap().result.ids(), vec!["e1", "e2"]);
}

#[test]
fn test_dataset_stats() {
    let (_dir, engine) = open_engine();
    let stats = engine.dataset().stats();
    assert_eq!(stats.store.collections[&ResourceType::Patient].records, 3);
    assert_eq!(stats.store.total_records(), 3 + 1 + 3 + 5 + 1);
    assert_eq!(stats.index.dangling_edges, 0);
}

#[test]
fn test_read_round_trips_unknown_fields() {
    let (_dir, engine) = open_engine();
    let patient = engine.read(ResourceType::Patient, "p1").unwrap();
    let json = patient.to_json();
    assert_eq!(json["name"][0]["family"], "Patient_p1");
    assert_eq!(json["birthDate"], "2100-04-01");
}

#[test]
fn test_open_from_manifest() {
    let dir = common::mimic_fixture();
    let manifest = dir.path().join("layout.json");
    std::fs::write(
        &manifest,
        r#"{"data_dir": ".", "files": {"Patient": ["MimicPatient.ndjson"]}}"#,
    )
    .unwrap();

    let dataset = Dataset::from_manifest(&manifest).unwrap();
    assert_eq!(dataset.store().available_types(), vec![ResourceType::Patient]);

    let err = Dataset::from_manifest(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, EngineError::Load(LoadError::Manifest { .. })));
    assert_eq!(err.http_status(), 500);
}
