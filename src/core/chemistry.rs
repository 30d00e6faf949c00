use crate::core::domain::Composition;
use serde::{Deserialize, Serialize};

/// The ordered element set of one hull computation.
///
/// Hull coordinates are the mole fractions of every element except the first;
/// the first is implied by the others summing to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChemicalSystem {
    elements: Vec<String>,
}

impl ChemicalSystem {
    /// Sorts and de-duplicates the given symbols.
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut elements: Vec<String> = elements.into_iter().map(Into::into).collect();
        elements.sort();
        elements.dedup();
        Self { elements }
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of hull coordinates per composition.
    pub fn dim(&self) -> usize {
        self.elements.len().saturating_sub(1)
    }

    pub fn chemsys(&self) -> String {
        self.elements.join("-")
    }

    pub fn contains(&self, composition: &Composition) -> bool {
        composition
            .elements()
            .all(|el| self.elements.binary_search_by(|s| s.as_str().cmp(el)).is_ok())
    }

    /// True when every element of `self` is also in `other`.
    pub fn is_subsystem_of(&self, other: &ChemicalSystem) -> bool {
        self.elements
            .iter()
            .all(|el| other.elements.binary_search(el).is_ok())
    }

    /// Mole fractions of elements `1..n`, or `None` if the composition has
    /// elements outside the system.
    pub fn project(&self, composition: &Composition) -> Option<Vec<f64>> {
        if !self.contains(composition) {
            return None;
        }
        Some(
            self.elements
                .iter()
                .skip(1)
                .map(|el| composition.fraction(el))
                .collect(),
        )
    }
}

/// Contiguous coordinate storage, one row of `dim` values per point.
/// Access is O(1) via `index = i * dim + k`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloud {
    dim: usize,
    count: usize,
    coords: Vec<f64>,
}

impl PointCloud {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            count: 0,
            coords: Vec::new(),
        }
    }

    pub fn with_capacity(dim: usize, n: usize) -> Self {
        Self {
            dim,
            count: 0,
            coords: Vec::with_capacity(dim * n),
        }
    }

    pub fn push(&mut self, point: &[f64]) {
        debug_assert_eq!(point.len(), self.dim);
        self.coords.extend_from_slice(point);
        self.count += 1;
    }

    #[inline(always)]
    pub fn point(&self, i: usize) -> &[f64] {
        &self.coords[i * self.dim..(i + 1) * self.dim]
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when the two rows agree coordinate-wise within `tol`.
    pub fn same_point(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol)
    }
}
