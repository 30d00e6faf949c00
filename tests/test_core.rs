use phase_stability::core::chemistry::{ChemicalSystem, PointCloud};
use phase_stability::core::domain::{Composition, Entry, EvaluationMethod};
use phase_stability::HullError;

#[test]
fn test_formula_parsing() {
    let c = Composition::from_formula("Fe2O3").unwrap();
    assert_eq!(c.num_atoms(), 5.0);
    assert!((c.fraction("O") - 0.6).abs() < 1e-12);
    assert_eq!(c.reduced_formula(), "Fe2O3");
    assert_eq!(c.formula(), "Fe2 O3");
    assert_eq!(c.chemsys(), "Fe-O");

    let frac = Composition::from_formula("Li0.5CoO2").unwrap();
    assert!((frac.amount("Li") - 0.5).abs() < 1e-12);

    assert!(Composition::from_formula("Fe2(O3").is_err());
}

#[test]
fn test_reduced_formula_divides_common_factor() {
    let c = Composition::new([("A", 2.0), ("B", 2.0)]).unwrap();
    assert_eq!(c.reduced_formula(), "AB");
    let d = Composition::new([("A", 1.0), ("B", 1.0)]).unwrap();
    assert!(c.almost_equals(&d, 1e-9));
}

#[test]
fn test_composition_rejects_empty() {
    let err = Composition::new(Vec::<(String, f64)>::new()).unwrap_err();
    assert!(matches!(err, HullError::InvalidEntry { .. }));
    assert!(Composition::new([("A", 0.0)]).is_err());
    assert!(Composition::new([("A", -1.0)]).is_err());
}

#[test]
fn test_entry_energies() {
    let c = Composition::from_formula("AB").unwrap();
    let e = Entry::new(c, -4.0).unwrap().with_correction(-1.0);
    assert_eq!(e.energy_per_atom(), -2.5);
    assert_eq!(e.uncorrected_energy_per_atom(), -2.0);
    assert_eq!(e.method(), EvaluationMethod::new("Unknown"));

    let c = Composition::from_formula("A").unwrap();
    assert!(Entry::new(c, f64::NAN).is_err());
}

#[test]
fn test_entry_deserializes_with_defaults() {
    let json = r#"{"entry_id": "mp-1", "composition": {"Fe": 2.0, "O": 3.0}, "energy": -30.0}"#;
    let e: Entry = serde_json::from_str(json).unwrap();
    assert_eq!(e.entry_id.as_deref(), Some("mp-1"));
    assert_eq!(e.correction, 0.0);
    assert!(e.evaluation_method.is_none());
    assert!(e.validate().is_ok());
}

#[test]
fn test_chemical_system_projection() {
    let sys = ChemicalSystem::new(["O", "Fe", "Li", "O"]);
    assert_eq!(sys.chemsys(), "Fe-Li-O");
    assert_eq!(sys.dim(), 2);

    let c = Composition::from_formula("LiFeO2").unwrap();
    let x = sys.project(&c).unwrap();
    assert!((x[0] - 0.25).abs() < 1e-12);
    assert!((x[1] - 0.5).abs() < 1e-12);

    let outside = Composition::from_formula("Na").unwrap();
    assert!(sys.project(&outside).is_none());
    assert!(ChemicalSystem::new(["Fe", "O"]).is_subsystem_of(&sys));
}

#[test]
fn test_point_cloud_rows() {
    let mut cloud = PointCloud::new(2);
    cloud.push(&[0.1, 0.2]);
    cloud.push(&[0.3, 0.4]);
    assert_eq!(cloud.len(), 2);
    assert_eq!(cloud.point(1), &[0.3, 0.4]);
    assert!(PointCloud::same_point(cloud.point(0), &[0.1, 0.2 + 1e-9], 1e-6));
}

#[test]
fn test_deserialized_compositions_are_checked() {
    let negative = serde_json::from_str::<Composition>(r#"{"A": 2.0, "B": -1.0}"#);
    assert!(negative.is_err());

    let json = r#"{"entry_id": "bad", "composition": {"A": 2.0, "B": -1.0}, "energy": -10.0}"#;
    assert!(serde_json::from_str::<Entry>(json).is_err());

    // A zero amount does not drag B into the system.
    let json = r#"{"entry_id": "a", "composition": {"A": 1.0, "B": 0.0}, "energy": -1.0}"#;
    let e: Entry = serde_json::from_str(json).unwrap();
    assert!(e.composition.is_element());
    assert_eq!(e.composition.chemsys(), "A");
    assert_eq!(serde_json::to_string(&e.composition).unwrap(), r#"{"A":1.0}"#);
}

#[test]
fn test_zero_amount_element_stays_a_reference() {
    let json = r#"[
        {"entry_id": "a", "composition": {"A": 1.0, "B": 0.0}, "energy": -1.0},
        {"entry_id": "b", "composition": {"B": 1.0}, "energy": -2.0},
        {"entry_id": "ab", "composition": {"A": 1.0, "B": 1.0}, "energy": -3.2}
    ]"#;
    let entries: Vec<Entry> = serde_json::from_str(json).unwrap();
    let refs = phase_stability::resolve_references(&entries);
    assert!(refs.ensure_complete().is_ok());
    assert_eq!(refs.entry_index("A"), Some(0));
}
