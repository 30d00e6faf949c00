use std::fs;

use crossbeam_channel::unbounded;
use uuid::Uuid;

use phase_stability::core::domain::{EvaluationMethod, HullPartition, ThermoParams};
use phase_stability::engine::external::json_store::JsonStore;
use phase_stability::engine::store::{EntryQuery, MemoryStore, RecordStore};
use phase_stability::pipeline::batch::ThermoBuilder;
use phase_stability::pipeline::BatchEvent;
use phase_stability::{Entry, HullError};

use crate::common::{entry, lfo_system, named, ternary_toy};

mod common;

fn ids(entries: &[Entry]) -> Vec<String> {
    let mut ids: Vec<String> = entries.iter().filter_map(|e| e.entry_id.clone()).collect();
    ids.sort();
    ids
}

#[test]
fn test_group_by_chemsys_keeps_maximal_systems() {
    let mut entries = lfo_system();
    entries.extend(ternary_toy());
    let groups = ThermoBuilder::group_by_chemsys(&entries);

    let names: Vec<String> = groups.iter().map(|(s, _)| s.chemsys()).collect();
    // No toy entry contains A, B and C together.
    assert_eq!(names, vec!["A-B", "C", "Fe-Li-O"]);
    assert_eq!(ids(&groups[0].1), vec!["a", "ab-high", "ab-low", "b"]);
    assert_eq!(ids(&groups[2].1), ids(&lfo_system()));
}

#[test]
fn test_run_streams_events_and_isolates_failures() {
    let mut entries = ternary_toy();
    // Two compositions cannot span D-E-F.
    entries.push(named("def", "DEF", -1.0));
    entries.push(named("d2ef", "D2EF", -1.0));

    let (tx, rx) = unbounded();
    let report = ThermoBuilder::new(ThermoParams::default()).run(entries, &tx);

    let events: Vec<BatchEvent> = rx.try_iter().collect();
    assert!(matches!(events.first(), Some(BatchEvent::Log(_))));
    assert!(matches!(events.last(), Some(BatchEvent::Finished)));
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::SystemFinished(s) if s.chemsys == "A-B")));
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::SystemFailed { chemsys, .. } if chemsys == "D-E-F")));

    assert_eq!(report.system_failures.len(), 1);
    assert!(matches!(
        report.system_failures[0].error,
        HullError::DegenerateHull { rank: 2, elements: 3, .. }
    ));
    assert!(report.entry_failures.is_empty());
    assert_eq!(report.documents.len(), 5);

    let stats = report.stats.iter().find(|s| s.chemsys == "A-B").unwrap();
    assert_eq!(stats.stable, 3);
    assert_eq!(stats.unstable, 1);
    assert_eq!(stats.facets, 2);

    let high = report
        .documents
        .iter()
        .find(|d| d.material_id == "ab-high")
        .unwrap();
    assert!((high.energy_above_hull - 0.6).abs() < 1e-9);
}

#[test]
fn test_missing_references_are_warnings() {
    let entries = vec![named("ab", "AB", -1.0), named("ab2", "AB2", -1.2), named("a", "A", -0.5)];
    let (tx, _rx) = unbounded();
    let report = ThermoBuilder::new(ThermoParams::default()).run(entries, &tx);

    assert_eq!(report.documents.len(), 3);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].0, "A-B");
    assert_eq!(
        report.warnings[0].1,
        HullError::MissingReference {
            element: "B".to_string()
        }
    );
    assert!(report.documents.iter().all(|d| d.formation_energy_per_atom.is_none() || d.material_id == "a"));
}

#[test]
fn test_invalid_and_unnamed_entries() {
    let mut broken = entry("A", -1.0);
    broken.energy = f64::INFINITY;
    let entries = vec![broken, entry("A", -1.0), entry("B", -2.0), entry("AB", -1.6)];

    let (tx, _rx) = unbounded();
    let report = ThermoBuilder::new(ThermoParams::default()).run(entries, &tx);

    assert_eq!(report.entry_failures.len(), 1);
    assert!(matches!(report.entry_failures[0].error, HullError::InvalidEntry { .. }));
    assert_eq!(report.documents.len(), 3);
    for doc in &report.documents {
        assert!(Uuid::parse_str(&doc.material_id).is_ok());
    }
}

#[test]
fn test_per_method_partition() {
    let entries = vec![
        named("mp-a", "A", -1.0).with_method("GGA"),
        named("mp-b", "B", -2.0).with_method("GGA"),
        named("mp-ab", "AB", -1.4).with_method("GGA"),
        named("mp-a", "A", -1.2).with_method("R2SCAN"),
        named("mp-b", "B", -2.2).with_method("R2SCAN"),
        named("mp-ab", "AB", -1.9).with_method("R2SCAN"),
    ];
    let params = ThermoParams {
        partition: HullPartition::PerMethod,
        ..ThermoParams::default()
    };
    let (tx, _rx) = unbounded();
    let report = ThermoBuilder::new(params).run(entries, &tx);

    assert_eq!(report.documents.len(), 3);
    assert_eq!(report.stats[0].facets, 3);

    let ab = report.documents.iter().find(|d| d.material_id == "mp-ab").unwrap();
    assert_eq!(ab.energy_type.as_str(), "R2SCAN");
    assert!(ab.is_stable);
    assert!((ab.formation_energy_per_atom.unwrap() + 0.2).abs() < 1e-9);

    // The GGA hull is judged against GGA references only.
    let gga = &ab.entries[&EvaluationMethod::new("GGA")];
    assert!(!gga.is_stable);
    assert!((gga.energy_above_hull - 0.1).abs() < 1e-9);
    assert!((gga.formation_energy_per_atom.unwrap() - 0.1).abs() < 1e-9);
}

#[test]
fn test_memory_store_round_trip() {
    let store = MemoryStore::new(lfo_system());
    let fe_o = store.entries(&EntryQuery::Chemsys("Fe-O".to_string())).unwrap();
    assert_eq!(ids(&fe_o), vec!["fe", "fe2o3", "fe3o4", "feo", "o"]);
    let picked = store
        .entries(&EntryQuery::Ids(vec!["li".to_string(), "nope".to_string()]))
        .unwrap();
    assert_eq!(picked.len(), 1);

    let (tx, _rx) = unbounded();
    let report = ThermoBuilder::new(ThermoParams::default()).run(store.entries(&EntryQuery::All).unwrap(), &tx);
    assert_eq!(store.upsert(&report.documents).unwrap(), 10);
    assert_eq!(store.document_count(), 10);
    assert!(store.document("lio-bad").is_some_and(|d| !d.is_stable));
    assert_eq!(store.name(), "memory");
}

#[test]
fn test_json_store_upserts_by_material_id() {
    let dir = std::env::temp_dir().join(format!("phase-stability-{}", Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    let input = dir.join("entries.json");
    let output = dir.join("documents.json");
    fs::write(&input, serde_json::to_string(&ternary_toy()).unwrap()).unwrap();

    let store = JsonStore::new(&input, &output);
    let entries = store.entries(&EntryQuery::All).unwrap();
    assert_eq!(entries.len(), 5);

    let (tx, _rx) = unbounded();
    let report = ThermoBuilder::new(ThermoParams::default()).run(entries, &tx);
    store.upsert(&report.documents).unwrap();
    // Writing the same documents again replaces them.
    store.upsert(&report.documents[..2]).unwrap();

    let raw = fs::read_to_string(&output).unwrap();
    let docs: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(docs.len(), 5);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_json_store_skips_malformed_records() {
    let dir = std::env::temp_dir().join(format!("phase-stability-{}", Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    let input = dir.join("entries.json");
    fs::write(
        &input,
        r#"[
            {"entry_id": "a", "composition": {"A": 1.0}, "energy": -1.0},
            {"entry_id": "neg", "composition": {"A": 2.0, "B": -1.0}, "energy": -10.0},
            {"entry_id": "empty", "composition": {}, "energy": -1.0},
            {"entry_id": "b", "composition": {"B": 1.0}, "energy": -2.0}
        ]"#,
    )
    .unwrap();

    let store = JsonStore::new(&input, dir.join("documents.json"));
    let entries = store.entries(&EntryQuery::All).unwrap();
    assert_eq!(ids(&entries), vec!["a", "b"]);

    fs::remove_dir_all(&dir).unwrap();
}
