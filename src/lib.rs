//! Phase stability analysis for computed formation energies.
//!
//! Builds the lower convex hull of a chemical system's composition-energy
//! cloud, classifies each entry against it and folds per-method results into
//! one thermo document per material.

pub mod core {
    pub mod chemistry;
    pub mod domain;
    pub mod error;
}

pub mod engine {
    pub mod evaluator;
    pub mod hull;
    pub mod reference;
    pub mod store;

    pub mod external {
        pub mod json_store;
    }
}

pub mod analysis {
    pub mod document;
    pub mod tagger;
}

pub mod pipeline;

pub use crate::analysis::document::{synthesize_document, MaterialDocument};
pub use crate::core::domain::{Composition, Entry, EvaluationMethod, HullParams, ThermoParams};
pub use crate::core::error::HullError;
pub use crate::engine::evaluator::{evaluate_entry, StabilityResult};
pub use crate::engine::hull::{build_hull, Hull};
pub use crate::engine::reference::{resolve_references, References};
