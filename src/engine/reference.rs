use std::collections::BTreeMap;

use log::warn;

use crate::core::domain::Entry;
use crate::core::error::{HullError, Result};

/// Elemental zero points for formation energies.
#[derive(Debug, Clone, Default)]
pub struct References {
    /// element -> (index into the resolved entries, energy per atom)
    energies: BTreeMap<String, (usize, f64)>,
    missing: Vec<String>,
}

impl References {
    /// Reference energy per atom of `element`.
    pub fn energy(&self, element: &str) -> Result<f64> {
        self.energies
            .get(element)
            .map(|(_, e)| *e)
            .ok_or_else(|| HullError::missing_reference(element))
    }

    /// Index (into the slice given to `resolve`) of the reference entry.
    pub fn entry_index(&self, element: &str) -> Option<usize> {
        self.energies.get(element).map(|(i, _)| *i)
    }

    /// Elements that appear in the system but have no single-element entry.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Fails with the first element lacking a reference.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.missing.first() {
            Some(el) => Err(HullError::missing_reference(el)),
            None => Ok(()),
        }
    }

    /// Corrected energy per atom minus the fraction-weighted references.
    pub fn formation_energy_per_atom(&self, entry: &Entry) -> Result<f64> {
        let mut reference = 0.0;
        for el in entry.composition.elements() {
            reference += entry.composition.fraction(el) * self.energy(el)?;
        }
        Ok(entry.energy_per_atom() - reference)
    }
}

/// Picks the lowest-energy single-element entry for every element.
pub struct ElementalReferenceResolver;

impl ElementalReferenceResolver {
    pub fn resolve(entries: &[Entry]) -> References {
        let mut energies: BTreeMap<String, (usize, f64)> = BTreeMap::new();

        for (i, entry) in entries.iter().enumerate() {
            if !entry.composition.is_element() {
                continue;
            }
            let Some(el) = entry.composition.elements().next() else {
                continue;
            };
            let e = entry.energy_per_atom();
            // Strict comparison keeps the first entry on ties.
            match energies.get(el) {
                Some((_, best)) if *best <= e => {}
                _ => {
                    energies.insert(el.to_string(), (i, e));
                }
            }
        }

        let mut missing: Vec<String> = entries
            .iter()
            .flat_map(|e| e.composition.elements())
            .filter(|el| !energies.contains_key(*el))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();

        if !missing.is_empty() {
            warn!(
                "No elemental reference for {}; formation energies involving them are omitted",
                missing.join(", ")
            );
        }

        References { energies, missing }
    }
}

pub fn resolve_references(entries: &[Entry]) -> References {
    ElementalReferenceResolver::resolve(entries)
}
