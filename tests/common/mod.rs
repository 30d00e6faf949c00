#![allow(dead_code)]

use phase_stability::core::domain::{Composition, Entry};

/// Entry from a formula and an energy *per atom*.
pub fn entry(formula: &str, energy_per_atom: f64) -> Entry {
    let composition = Composition::from_formula(formula).expect("valid formula");
    let total = energy_per_atom * composition.num_atoms();
    Entry::new(composition, total).expect("valid entry")
}

pub fn named(id: &str, formula: &str, energy_per_atom: f64) -> Entry {
    entry(formula, energy_per_atom).with_id(id)
}

/// The A-B-C toy system: three elements and two AB polymorphs.
pub fn ternary_toy() -> Vec<Entry> {
    vec![
        named("a", "A", -1.0),
        named("b", "B", -2.0),
        named("c", "C", -1.5),
        named("ab-low", "AB", -1.6),
        named("ab-high", "AB", -1.0),
    ]
}

/// A richer Li-Fe-O style system with stable and unstable ternaries.
pub fn lfo_system() -> Vec<Entry> {
    vec![
        named("li", "Li", -1.9),
        named("fe", "Fe", -8.3),
        named("o", "O", -4.9),
        named("li2o", "Li2O", -4.8),
        named("fe2o3", "Fe2O3", -6.9),
        named("feo", "FeO", -6.7),
        named("lifeo2", "LiFeO2", -6.1),
        named("li5feo4", "Li5FeO4", -4.6),
        named("lio-bad", "LiO", -3.0),
        named("fe3o4", "Fe3O4", -6.8),
    ]
}
