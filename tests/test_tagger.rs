use serde_json::json;

use phase_stability::analysis::tagger::{Condition, MissingKeyPolicy, Record, TagRule, TaskTagger};

fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).unwrap()
}

fn rules() -> Vec<TagRule> {
    serde_json::from_value(json!([
        {
            "task_type": "NSCF Line",
            "conditions": [
                {"kind": "exact", "key": "ICHARG", "value": 11, "weight": 2.0},
                {"kind": "greater", "key": "NBANDS", "threshold": 100.0, "weight": 1.0}
            ]
        },
        {
            "task_type": "Static",
            "conditions": [
                {"kind": "exact", "key": "NSW", "value": 0, "weight": 2.0},
                {"kind": "less", "key": "EDIFF", "threshold": 1e-5, "weight": 1.0}
            ]
        },
        {
            "task_type": "Structure Optimization",
            "conditions": [
                {"kind": "greater", "key": "NSW", "threshold": 1.0, "weight": 2.0},
                {"kind": "exact", "key": "IBRION", "value": 2, "weight": 1.0}
            ]
        }
    ]))
    .unwrap()
}

#[test]
fn test_rules_deserialize_with_kind_tag() {
    let rules = rules();
    assert_eq!(rules.len(), 3);
    assert_eq!(
        rules[1].conditions[1],
        Condition::Less {
            key: "EDIFF".to_string(),
            threshold: 1e-5,
            weight: 1.0,
        }
    );
    assert_eq!(rules[0].conditions[0].key(), "ICHARG");
}

#[test]
fn test_highest_score_wins() {
    let tagger = TaskTagger::new(rules());

    let relax = record(json!({"NSW": 99, "IBRION": 2, "EDIFF": 1e-6}));
    assert_eq!(tagger.classify(&relax), Some("Structure Optimization"));

    let stat = record(json!({"NSW": 0, "EDIFF": 1e-6}));
    assert_eq!(tagger.score(&stat, &tagger.rules()[1]), 3.0);
    assert_eq!(tagger.classify(&stat), Some("Static"));

    let line = record(json!({"ICHARG": 11, "NBANDS": 200, "NSW": 0}));
    assert_eq!(tagger.classify(&line), Some("NSCF Line"));
}

#[test]
fn test_ties_go_to_the_first_rule() {
    let tagger = TaskTagger::new(rules());
    // Static and Structure Optimization both score 1.0.
    let r = record(json!({"EDIFF": 1e-6, "IBRION": 2}));
    assert_eq!(tagger.classify(&r), Some("Static"));
}

#[test]
fn test_no_positive_score_means_no_label() {
    let tagger = TaskTagger::new(rules());
    assert_eq!(tagger.classify(&record(json!({"ENCUT": 520}))), None);
    assert_eq!(TaskTagger::default().classify(&Record::new()), None);
}

#[test]
fn test_missing_key_policies() {
    let r = record(json!({"ICHARG": 11}));

    let modern = TaskTagger::new(rules());
    assert_eq!(modern.score(&r, &modern.rules()[0]), 2.0);
    assert_eq!(modern.score(&r, &modern.rules()[2]), 0.0);
    assert_eq!(modern.classify(&r), Some("NSCF Line"));

    // A missing NBANDS reads as huge, a missing EDIFF as zero, a missing NSW as huge.
    let legacy = TaskTagger::new(rules()).with_missing_policy(MissingKeyPolicy::Legacy);
    assert_eq!(legacy.score(&r, &legacy.rules()[0]), 3.0);
    assert_eq!(legacy.score(&r, &legacy.rules()[1]), 1.0);
    assert_eq!(legacy.score(&r, &legacy.rules()[2]), 2.0);
    assert_eq!(legacy.classify(&r), Some("NSCF Line"));
}

#[test]
fn test_non_numeric_values_never_satisfy_thresholds() {
    let tagger = TaskTagger::new(rules()).with_missing_policy(MissingKeyPolicy::Legacy);
    let r = record(json!({"NSW": "lots"}));
    assert_eq!(tagger.score(&r, &tagger.rules()[2]), 0.0);
}
