use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::domain::{Composition, Entry, EvaluationMethod, ThermoParams};
use crate::core::error::{HullError, Result};
use crate::engine::evaluator::StabilityResult;

/// A material an unstable material decomposes into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionProduct {
    pub material_id: Option<String>,
    pub formula: String,
    /// Amount in atom fractions of the decomposing material.
    pub amount: f64,
}

/// One evaluation method's raw entry and its energy fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEntry {
    pub entry: Entry,
    pub uncorrected_energy_per_atom: f64,
    pub energy_per_atom: f64,
    pub formation_energy_per_atom: Option<f64>,
    pub energy_above_hull: f64,
    pub is_stable: bool,
}

/// Thermodynamic summary of one material across evaluation methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDocument {
    pub material_id: String,
    pub composition: Composition,
    pub formula_pretty: String,
    pub chemsys: String,
    pub elements: Vec<String>,
    pub nelements: usize,

    pub uncorrected_energy_per_atom: f64,
    pub energy_per_atom: f64,
    pub energy_uncertainty_per_atom: Option<f64>,
    pub formation_energy_per_atom: Option<f64>,
    pub energy_above_hull: f64,
    pub is_stable: bool,
    pub equilibrium_reaction_energy_per_atom: Option<f64>,
    pub decomposes_to: Option<Vec<DecompositionProduct>>,

    /// Method whose result populates the fields above.
    pub energy_type: EvaluationMethod,
    /// Every method available for this material, preferred first.
    pub entry_types: Vec<EvaluationMethod>,
    pub entries: BTreeMap<EvaluationMethod, MethodEntry>,

    pub sandboxes: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// Folds per-method stability results into material documents.
#[derive(Debug, Clone)]
pub struct MaterialDocumentSynthesizer {
    priority: Vec<EvaluationMethod>,
    sandboxes: Vec<String>,
}

impl MaterialDocumentSynthesizer {
    pub fn new(priority: Vec<EvaluationMethod>, sandboxes: Vec<String>) -> Self {
        Self { priority, sandboxes }
    }

    pub fn from_params(params: &ThermoParams) -> Self {
        Self::new(params.priority.clone(), params.sandboxes.clone())
    }

    /// Groups entry indices by material identity. Entries without an
    /// identifier become their own material under a fresh UUID.
    pub fn group_by_material(entries: &[Entry]) -> BTreeMap<String, Vec<usize>> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let id = entry
                .entry_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            groups.entry(id).or_default().push(i);
        }
        groups
    }

    /// Present methods, ordered by the priority list and then lexically.
    pub fn rank_methods(&self, present: &[EvaluationMethod]) -> Vec<EvaluationMethod> {
        let mut ranked: Vec<EvaluationMethod> = self
            .priority
            .iter()
            .filter(|m| present.contains(m))
            .cloned()
            .collect();
        let mut rest: Vec<EvaluationMethod> = present
            .iter()
            .filter(|m| !self.priority.contains(m))
            .cloned()
            .collect();
        rest.sort();
        rest.dedup();
        ranked.extend(rest);
        ranked
    }

    /// `entries[i]` must be the entry `results[i]` was computed for.
    pub fn synthesize(
        &self,
        material_id: &str,
        entries: &[Entry],
        results: &[StabilityResult],
    ) -> Result<MaterialDocument> {
        if entries.is_empty() {
            return Err(HullError::EmptyMaterial {
                material_id: material_id.to_string(),
            });
        }
        if entries.len() != results.len() {
            return Err(HullError::LengthMismatch {
                material_id: material_id.to_string(),
                entries: entries.len(),
                results: results.len(),
            });
        }

        let first = &entries[0].composition;
        if let Some(other) = entries[1..]
            .iter()
            .find(|e| !e.composition.almost_equals(first, 1e-6))
        {
            return Err(HullError::MixedComposition {
                material_id: material_id.to_string(),
                first: first.reduced_formula(),
                second: other.composition.reduced_formula(),
            });
        }

        // One index per method; the lower energy per atom wins, ties keep the first.
        let mut by_method: BTreeMap<EvaluationMethod, usize> = BTreeMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let method = entry.method();
            match by_method.get(&method) {
                Some(&j) if entries[j].energy_per_atom() <= entry.energy_per_atom() => {}
                _ => {
                    by_method.insert(method, i);
                }
            }
        }

        let present: Vec<EvaluationMethod> = by_method.keys().cloned().collect();
        let entry_types = self.rank_methods(&present);
        let energy_type = entry_types[0].clone();
        let best = by_method[&energy_type];
        let (entry, result) = (&entries[best], &results[best]);

        let methods = by_method
            .iter()
            .map(|(method, &i)| (method.clone(), method_entry(&entries[i], &results[i])))
            .collect();

        let n = entry.composition.num_atoms();
        Ok(MaterialDocument {
            material_id: material_id.to_string(),
            composition: entry.composition.clone(),
            formula_pretty: entry.composition.reduced_formula(),
            chemsys: entry.composition.chemsys(),
            elements: entry.composition.elements().map(str::to_string).collect(),
            nelements: entry.composition.len(),
            uncorrected_energy_per_atom: entry.uncorrected_energy_per_atom(),
            energy_per_atom: entry.energy_per_atom(),
            energy_uncertainty_per_atom: entry.correction_uncertainty.map(|u| u / n),
            formation_energy_per_atom: result.formation_energy_per_atom,
            energy_above_hull: result.energy_above_hull,
            is_stable: result.is_stable,
            equilibrium_reaction_energy_per_atom: result.equilibrium_reaction_energy,
            decomposes_to: result.decomposition.as_ref().map(|products| {
                products
                    .iter()
                    .map(|p| DecompositionProduct {
                        material_id: p.entry.entry_id.clone(),
                        formula: p.entry.composition.formula(),
                        amount: p.amount,
                    })
                    .collect()
            }),
            energy_type,
            entry_types,
            entries: methods,
            sandboxes: self.sandboxes.clone(),
            last_updated: last_updated(entry).unwrap_or_else(Utc::now),
        })
    }
}

fn method_entry(entry: &Entry, result: &StabilityResult) -> MethodEntry {
    MethodEntry {
        entry: entry.clone(),
        uncorrected_energy_per_atom: entry.uncorrected_energy_per_atom(),
        energy_per_atom: entry.energy_per_atom(),
        formation_energy_per_atom: result.formation_energy_per_atom,
        energy_above_hull: result.energy_above_hull,
        is_stable: result.is_stable,
    }
}

/// Explicit field first, then `parameters`, then `data` (RFC 3339 strings).
fn last_updated(entry: &Entry) -> Option<DateTime<Utc>> {
    if entry.last_updated.is_some() {
        return entry.last_updated;
    }
    [&entry.parameters, &entry.data]
        .into_iter()
        .filter_map(|map| map.get("last_updated").and_then(|v| v.as_str()))
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn synthesize_document(
    material_id: &str,
    entries: &[Entry],
    results: &[StabilityResult],
    priority: &[EvaluationMethod],
    sandboxes: &[String],
) -> Result<MaterialDocument> {
    MaterialDocumentSynthesizer::new(priority.to_vec(), sandboxes.to_vec()).synthesize(
        material_id,
        entries,
        results,
    )
}
