//! Error types for hull construction, stability evaluation and document
//! synthesis.

use thiserror::Error;

/// Errors raised by the stability core.
///
/// Per-entry variants (`PointOutsideHull`, `NumericToleranceViolation`) are
/// collected by batch callers alongside successful results. `DegenerateHull`
/// aborts one chemical system only. `MissingReference` only disables
/// formation energies.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HullError {
    /// The entry violates a construction invariant.
    #[error("invalid entry {entry}: {detail}")]
    InvalidEntry { entry: String, detail: String },

    /// No single-element entry exists for an element that appears in the system.
    #[error("no elemental reference entry for '{element}'")]
    MissingReference { element: String },

    /// The distinct compositions do not span the chemical system.
    #[error("degenerate hull for {chemsys}: {elements} elements need {required} independent compositions, found rank {rank}")]
    DegenerateHull {
        chemsys: String,
        elements: usize,
        required: usize,
        rank: usize,
    },

    /// No lower facet covers the entry's composition.
    #[error("entry {entry} is not covered by the {chemsys} hull")]
    PointOutsideHull { entry: String, chemsys: String },

    /// A barycentric or energy sanity check failed beyond tolerance.
    #[error("tolerance violation for entry {entry} on facet [{}] (weights [{}]): {detail}", .facet.join(", "), format_weights(.weights))]
    NumericToleranceViolation {
        entry: String,
        facet: Vec<String>,
        weights: Vec<f64>,
        detail: String,
    },

    /// A document was requested for a material with no entries.
    #[error("material {material_id} has no entries")]
    EmptyMaterial { material_id: String },

    /// Entries and stability results were not paired one-to-one.
    #[error("material {material_id}: {entries} entries but {results} stability results")]
    LengthMismatch {
        material_id: String,
        entries: usize,
        results: usize,
    },

    /// Entries under one material identity describe different compositions.
    #[error("material {material_id} mixes compositions {first} and {second}")]
    MixedComposition {
        material_id: String,
        first: String,
        second: String,
    },
}

fn format_weights(weights: &[f64]) -> String {
    weights
        .iter()
        .map(|w| format!("{:.6}", w))
        .collect::<Vec<_>>()
        .join(", ")
}

impl HullError {
    pub fn invalid_entry(entry: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidEntry {
            entry: entry.into(),
            detail: detail.into(),
        }
    }

    pub fn missing_reference(element: &str) -> Self {
        Self::MissingReference {
            element: element.to_string(),
        }
    }

    pub fn outside(entry: impl Into<String>, chemsys: &str) -> Self {
        Self::PointOutsideHull {
            entry: entry.into(),
            chemsys: chemsys.to_string(),
        }
    }

    /// True for errors that only affect a single entry of a batch.
    pub fn is_per_entry(&self) -> bool {
        matches!(
            self,
            Self::InvalidEntry { .. }
                | Self::PointOutsideHull { .. }
                | Self::NumericToleranceViolation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HullError>;
