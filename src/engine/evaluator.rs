use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::domain::Entry;
use crate::core::error::{HullError, Result};
use crate::engine::hull::{FacetHit, Hull};
use crate::engine::reference::References;

/// One product of a decomposition reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionAmount {
    pub entry: Entry,
    /// Atom fraction of the input supplied by this product.
    pub amount: f64,
}

/// The result of evaluating one entry against a hull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityResult {
    pub entry: Entry,
    pub is_stable: bool,
    /// eV/atom, never negative.
    pub energy_above_hull: f64,
    /// `None` when an elemental reference is missing.
    pub formation_energy_per_atom: Option<f64>,
    /// Present only for unstable entries.
    pub decomposition: Option<Vec<DecompositionAmount>>,
    /// Only for stable entries whose neighbours still cover the composition.
    pub equilibrium_reaction_energy: Option<f64>,
}

/// Evaluates entries against a shared, read-only hull.
pub struct StabilityEvaluator<'a> {
    hull: &'a Hull,
    references: &'a References,
}

impl<'a> StabilityEvaluator<'a> {
    pub fn new(hull: &'a Hull, references: &'a References) -> Self {
        Self { hull, references }
    }

    pub fn evaluate(&self, entry: &Entry) -> Result<StabilityResult> {
        entry.validate()?;
        let system = self.hull.system();
        let params = self.hull.params();
        let outside = || HullError::outside(entry.label(), &system.chemsys());

        let x = system.project(&entry.composition).ok_or_else(outside)?;
        let hit = self.hull.locate(&x).ok_or_else(outside)?;

        let e = entry.energy_per_atom();
        let above = e - hit.energy;
        if above < -params.energy_tolerance {
            return Err(self.violation(
                entry,
                &hit,
                format!("entry lies {:.6} eV/atom below the hull", -above),
            ));
        }
        let energy_above_hull = above.max(0.0);
        let is_stable = energy_above_hull <= params.energy_tolerance;

        let formation_energy_per_atom = match self.references.formation_energy_per_atom(entry) {
            Ok(ef) => Some(ef),
            Err(err) => {
                debug!("Formation energy omitted for {}: {}", entry.label(), err);
                None
            }
        };

        let (decomposition, equilibrium_reaction_energy) = if is_stable {
            (None, self.equilibrium_reaction_energy(entry, &x))
        } else {
            (Some(self.decompose(entry, &hit)?), None)
        };

        Ok(StabilityResult {
            entry: entry.clone(),
            is_stable,
            energy_above_hull,
            formation_energy_per_atom,
            decomposition,
            equilibrium_reaction_energy,
        })
    }

    /// Evaluates every entry the hull was built from, in parallel.
    /// Results keep the input order; failures stay in place.
    pub fn evaluate_all(&self) -> Vec<Result<StabilityResult>> {
        self.hull
            .entries()
            .par_iter()
            .map(|entry| self.evaluate(entry))
            .collect()
    }

    /// Energy of a stable entry relative to the hull of the other stable
    /// compositions, never positive. `None` when they no longer cover its
    /// composition.
    fn equilibrium_reaction_energy(&self, entry: &Entry, x: &[f64]) -> Option<f64> {
        let e = entry.energy_per_atom();
        let Some(own) = self.hull.vertex_at(x) else {
            // Stable within tolerance on a facet: it can react to nothing lower.
            return self.hull.locate(x).map(|hit| (e - hit.energy).min(0.0));
        };

        let restricted = match self.hull.without_point(own) {
            Ok(h) => h,
            Err(err) => {
                debug!("No equilibrium reaction energy for {}: {}", entry.label(), err);
                return None;
            }
        };
        let hit = restricted.locate(x);
        if hit.is_none() {
            debug!(
                "No equilibrium reaction energy for {}: neighbours do not cover it",
                entry.label()
            );
        }
        hit.map(|hit| (e - hit.energy).min(0.0))
    }

    fn decompose(&self, entry: &Entry, hit: &FacetHit) -> Result<Vec<DecompositionAmount>> {
        let params = self.hull.params();
        let kept: Vec<(usize, f64)> = hit
            .weights
            .iter()
            .copied()
            .filter(|(_, w)| *w > params.weight_tolerance)
            .collect();

        let total: f64 = kept.iter().map(|(_, w)| w).sum();
        if kept.is_empty() || (total - 1.0).abs() > params.composition_tolerance {
            return Err(self.violation(
                entry,
                hit,
                format!("decomposition weights sum to {:.9}", total),
            ));
        }

        let mut products: Vec<DecompositionAmount> = kept
            .into_iter()
            .map(|(p, w)| DecompositionAmount {
                entry: self.hull.point_entry(p).clone(),
                amount: w / total,
            })
            .collect();
        products.sort_by(|a, b| {
            b.amount.total_cmp(&a.amount).then_with(|| {
                a.entry
                    .composition
                    .reduced_formula()
                    .cmp(&b.entry.composition.reduced_formula())
            })
        });
        Ok(products)
    }

    fn violation(&self, entry: &Entry, hit: &FacetHit, detail: String) -> HullError {
        HullError::NumericToleranceViolation {
            entry: entry.label(),
            facet: self
                .hull
                .facet_entries(hit.facet)
                .iter()
                .map(|e| e.label())
                .collect(),
            weights: hit.weights.iter().map(|(_, w)| *w).collect(),
            detail,
        }
    }
}

pub fn evaluate_entry(entry: &Entry, hull: &Hull, references: &References) -> Result<StabilityResult> {
    StabilityEvaluator::new(hull, references).evaluate(entry)
}
