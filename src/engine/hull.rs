use std::collections::BTreeMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::core::chemistry::{ChemicalSystem, PointCloud};
use crate::core::domain::{Composition, Entry, HullParams};
use crate::core::error::{HullError, Result};

/// Signed-distance threshold for facet visibility (unit normals).
const GEOMETRY_EPS: f64 = 1e-10;
/// Minimum |det| of a facet's composition simplex; smaller facets are vertical.
const VOLUME_EPS: f64 = 1e-14;

/// The lower convex hull of one chemical system.
///
/// Points are the lowest-energy entry of each distinct composition, stored in
/// a flat arena. Facets are flattened lists of `facet_size` point indices,
/// each with a precomputed inverse of its barycentric matrix. Immutable once
/// built.
#[derive(Debug, Clone)]
pub struct Hull {
    system: ChemicalSystem,
    params: HullParams,
    entries: Vec<Entry>,
    /// Entry index -> point index (`None` for entries outside the system).
    entry_points: Vec<Option<usize>>,
    /// Point index -> index of its representative entry.
    point_entries: Vec<usize>,
    points: PointCloud,
    energies: Vec<f64>,
    facet_size: usize,
    facets: Vec<usize>,
    inverses: Vec<f64>,
    /// Sorted point indices that are vertices of the lower hull.
    vertices: Vec<usize>,
}

/// The facet containing a queried composition.
#[derive(Debug, Clone)]
pub(crate) struct FacetHit {
    pub facet: usize,
    /// (point index, barycentric weight) for every facet vertex.
    pub weights: Vec<(usize, f64)>,
    pub energy: f64,
}

impl Hull {
    pub fn system(&self) -> &ChemicalSystem {
        &self.system
    }

    pub fn params(&self) -> &HullParams {
        &self.params
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn facet_count(&self) -> usize {
        self.facets.len() / self.facet_size
    }

    /// Representative entries at the vertices of facet `f`.
    pub fn facet_entries(&self, f: usize) -> Vec<&Entry> {
        self.facet(f).iter().map(|&p| self.point_entry(p)).collect()
    }

    /// Number of distinct compositions.
    pub fn composition_count(&self) -> usize {
        self.points.len()
    }

    /// Entries designated as hull vertices, in canonical composition order.
    pub fn stable_entries(&self) -> Vec<&Entry> {
        self.vertices.iter().map(|&p| self.point_entry(p)).collect()
    }

    /// True if entry `i` (index into `entries()`) was chosen as a hull vertex.
    pub fn is_vertex_entry(&self, i: usize) -> bool {
        match self.entry_points.get(i).copied().flatten() {
            Some(p) => self.point_entries[p] == i && self.vertices.binary_search(&p).is_ok(),
            None => false,
        }
    }

    /// Hull energy per atom at a composition, if the hull covers it.
    pub fn energy_at(&self, composition: &Composition) -> Option<f64> {
        let x = self.system.project(composition)?;
        self.locate(&x).map(|hit| hit.energy)
    }

    pub(crate) fn facet(&self, f: usize) -> &[usize] {
        &self.facets[f * self.facet_size..(f + 1) * self.facet_size]
    }

    pub(crate) fn point_entry(&self, p: usize) -> &Entry {
        &self.entries[self.point_entries[p]]
    }

    /// Hull vertex sitting at composition `x`, if any.
    pub(crate) fn vertex_at(&self, x: &[f64]) -> Option<usize> {
        let tol = self.params.composition_tolerance;
        self.vertices
            .iter()
            .copied()
            .find(|&p| PointCloud::same_point(self.points.point(p), x, tol))
    }

    /// Finds the first facet (canonical order) whose composition simplex
    /// contains `x` and interpolates the hull energy there.
    pub(crate) fn locate(&self, x: &[f64]) -> Option<FacetHit> {
        let dim = self.system.dim();
        if self.facet_size == 1 {
            let p = self.facets[0];
            let same = PointCloud::same_point(self.points.point(p), x, self.params.composition_tolerance);
            return same.then(|| FacetHit {
                facet: 0,
                weights: vec![(p, 1.0)],
                energy: self.energies[p],
            });
        }

        let wtol = self.params.weight_tolerance;
        for f in 0..self.facet_count() {
            let verts = self.facet(f);
            let v0 = self.points.point(verts[0]);
            let inv = DMatrix::from_column_slice(dim, dim, &self.inverses[f * dim * dim..(f + 1) * dim * dim]);
            let rhs = DVector::from_iterator(dim, x.iter().zip(v0).map(|(a, b)| a - b));
            let lambda = inv * rhs;

            let l0 = 1.0 - lambda.sum();
            let mut weights = Vec::with_capacity(verts.len());
            weights.push((verts[0], l0));
            weights.extend(verts[1..].iter().copied().zip(lambda.iter().copied()));

            if weights.iter().all(|(_, w)| *w >= -wtol) {
                let energy = weights.iter().map(|(p, w)| w * self.energies[*p]).sum();
                return Some(FacetHit { facet: f, weights, energy });
            }
        }
        None
    }

    /// Hull over the vertices of this hull except point `exclude`.
    pub(crate) fn without_point(&self, exclude: usize) -> Result<Hull> {
        let others: Vec<Entry> = self
            .vertices
            .iter()
            .filter(|&&p| p != exclude)
            .map(|&p| self.point_entry(p).clone())
            .collect();
        ConvexHullBuilder::new(self.params)
            .with_system(self.system.clone())
            .build(&others)
    }
}

/// Builds lower convex hulls with a fixed set of tolerances.
#[derive(Debug, Clone, Default)]
pub struct ConvexHullBuilder {
    params: HullParams,
    system: Option<ChemicalSystem>,
}

impl ConvexHullBuilder {
    pub fn new(params: HullParams) -> Self {
        Self { params, system: None }
    }

    /// Declares the chemical system instead of deriving it from the entries.
    pub fn with_elements<I, S>(self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_system(ChemicalSystem::new(elements))
    }

    pub fn with_system(mut self, system: ChemicalSystem) -> Self {
        self.system = Some(system);
        self
    }

    /// Invalid entries and entries outside the system are kept in
    /// `entries()` but excluded from the geometry.
    pub fn build(&self, entries: &[Entry]) -> Result<Hull> {
        let valid: Vec<bool> = entries
            .iter()
            .map(|e| match e.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!("{}; excluded from the hull", err);
                    false
                }
            })
            .collect();

        let system = self.system.clone().unwrap_or_else(|| {
            ChemicalSystem::new(
                entries
                    .iter()
                    .zip(&valid)
                    .filter(|(_, ok)| **ok)
                    .flat_map(|(e, _)| e.composition.elements().map(str::to_string)),
            )
        });
        let dim = system.dim();
        let tol = self.params.composition_tolerance;

        // 1. Collapse entries to one point per distinct composition.
        let mut raw = PointCloud::with_capacity(dim, entries.len());
        let mut raw_energies: Vec<f64> = Vec::new();
        let mut raw_entries: Vec<usize> = Vec::new();
        let mut entry_points = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            if !valid[i] {
                entry_points.push(None);
                continue;
            }
            let Some(x) = system.project(&entry.composition) else {
                warn!(
                    "Entry {} lies outside {}; excluded from the hull",
                    entry.label(),
                    system.chemsys()
                );
                entry_points.push(None);
                continue;
            };
            let epa = entry.energy_per_atom();
            match (0..raw.len()).find(|&p| PointCloud::same_point(raw.point(p), &x, tol)) {
                Some(p) => {
                    // Strict comparison keeps the first entry on ties.
                    if epa < raw_energies[p] {
                        raw_energies[p] = epa;
                        raw_entries[p] = i;
                    }
                    entry_points.push(Some(p));
                }
                None => {
                    raw.push(&x);
                    raw_energies.push(epa);
                    raw_entries.push(i);
                    entry_points.push(Some(raw.len() - 1));
                }
            }
        }

        // 2. Canonical point order so the hull does not depend on input order.
        let mut order: Vec<usize> = (0..raw.len()).collect();
        order.sort_by(|&a, &b| {
            raw.point(a)
                .iter()
                .zip(raw.point(b))
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(raw_energies[a].total_cmp(&raw_energies[b]))
        });
        let mut rank_of = vec![0; order.len()];
        let mut points = PointCloud::with_capacity(dim, order.len());
        let mut energies = Vec::with_capacity(order.len());
        let mut point_entries = Vec::with_capacity(order.len());
        for (new, &old) in order.iter().enumerate() {
            rank_of[old] = new;
            points.push(raw.point(old));
            energies.push(raw_energies[old]);
            point_entries.push(raw_entries[old]);
        }
        let entry_points: Vec<Option<usize>> = entry_points
            .into_iter()
            .map(|p| p.map(|old| rank_of[old]))
            .collect();

        let mut hull = Hull {
            system,
            params: self.params,
            entries: entries.to_vec(),
            entry_points,
            point_entries,
            points,
            energies,
            facet_size: 1,
            facets: Vec::new(),
            inverses: Vec::new(),
            vertices: Vec::new(),
        };

        // 3. Degenerate shapes.
        let degenerate = |rank: usize, system: &ChemicalSystem| HullError::DegenerateHull {
            chemsys: system.chemsys(),
            elements: system.len(),
            required: system.len(),
            rank,
        };
        match hull.points.len() {
            0 => return Err(degenerate(0, &hull.system)),
            1 => {
                hull.facets = vec![0];
                hull.vertices = vec![0];
                debug!("Built single-point hull for {}", hull.system.chemsys());
                return Ok(hull);
            }
            _ => {}
        }

        let comps: Vec<&[f64]> = (0..hull.points.len()).map(|p| hull.points.point(p)).collect();
        let rank = affine_basis(&comps, tol).len();
        if rank < dim {
            // Rank counts directions; the error reports independent compositions.
            return Err(degenerate(rank + 1, &hull.system));
        }

        // 4. Lower hull facets of the lifted cloud (fractions, energy).
        let mut lifted = PointCloud::with_capacity(dim + 1, hull.points.len());
        let mut row = Vec::with_capacity(dim + 1);
        for p in 0..hull.points.len() {
            row.clear();
            row.extend_from_slice(hull.points.point(p));
            row.push(hull.energies[p]);
            lifted.push(&row);
        }
        let lower = lower_facets(&lifted).ok_or_else(|| degenerate(rank + 1, &hull.system))?;

        hull.facet_size = dim + 1;
        for verts in lower.chunks(dim + 1) {
            let v0 = hull.points.point(verts[0]);
            let m = DMatrix::from_fn(dim, dim, |r, c| hull.points.point(verts[c + 1])[r] - v0[r]);
            if m.determinant().abs() <= VOLUME_EPS {
                continue;
            }
            let Some(inv) = m.try_inverse() else {
                continue;
            };
            hull.facets.extend_from_slice(verts);
            hull.inverses.extend_from_slice(inv.as_slice());
        }

        let mut vertices = hull.facets.clone();
        vertices.sort_unstable();
        vertices.dedup();
        hull.vertices = vertices;

        debug!(
            "Built {} hull: {} compositions, {} lower facets, {} vertices",
            hull.system.chemsys(),
            hull.points.len(),
            hull.facet_count(),
            hull.vertices.len()
        );
        Ok(hull)
    }
}

pub fn build_hull(entries: &[Entry], params: &HullParams) -> Result<Hull> {
    ConvexHullBuilder::new(*params).build(entries)
}

// --- Geometry ---

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Orthonormal basis of the affine span of `pts` (Gram-Schmidt).
/// Points closer than `tol` to the current span add nothing.
fn affine_basis(pts: &[&[f64]], tol: f64) -> Vec<Vec<f64>> {
    let mut basis: Vec<Vec<f64>> = Vec::new();
    let Some(origin) = pts.first() else {
        return basis;
    };
    for p in &pts[1..] {
        let residual = residual(p, origin, &basis);
        let norm = dot(&residual, &residual).sqrt();
        if norm > tol {
            basis.push(residual.iter().map(|r| r / norm).collect());
        }
    }
    basis
}

/// Component of `p - origin` orthogonal to `basis`.
fn residual(p: &[f64], origin: &[f64], basis: &[Vec<f64>]) -> Vec<f64> {
    let mut v: Vec<f64> = p.iter().zip(origin).map(|(a, b)| a - b).collect();
    for b in basis {
        let proj = dot(&v, b);
        v.iter_mut().zip(b).for_each(|(x, y)| *x -= proj * y);
    }
    v
}

/// Facets of the working hull. Vertex lists and unit normals are flat
/// buffers with stride `d`.
struct FacetBuffer {
    d: usize,
    vertices: Vec<usize>,
    normals: Vec<f64>,
    offsets: Vec<f64>,
}

impl FacetBuffer {
    fn new(d: usize) -> Self {
        Self {
            d,
            vertices: Vec::new(),
            normals: Vec::new(),
            offsets: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn vertices(&self, f: usize) -> &[usize] {
        &self.vertices[f * self.d..(f + 1) * self.d]
    }

    fn normal(&self, f: usize) -> &[f64] {
        &self.normals[f * self.d..(f + 1) * self.d]
    }

    fn distance(&self, f: usize, p: &[f64]) -> f64 {
        dot(self.normal(f), p) - self.offsets[f]
    }

    /// Adds the hyperplane through `verts`, unit normal pointing away from
    /// `interior`. Returns false if the vertices are affinely dependent.
    fn push(&mut self, verts: &[usize], pts: &PointCloud, interior: &[f64]) -> bool {
        let d = self.d;
        let p0 = pts.point(verts[0]);
        let edges = DMatrix::from_fn(d - 1, d, |r, c| pts.point(verts[r + 1])[c] - p0[c]);

        // Generalized cross product: cofactors along the missing row.
        let start = self.normals.len();
        for j in 0..d {
            let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
            self.normals.push(sign * edges.clone().remove_column(j).determinant());
        }

        let norm = dot(&self.normals[start..], &self.normals[start..]).sqrt();
        if norm <= VOLUME_EPS {
            self.normals.truncate(start);
            return false;
        }
        let normal = &mut self.normals[start..];
        normal.iter_mut().for_each(|n| *n /= norm);
        let mut offset = dot(normal, p0);
        if dot(normal, interior) - offset > 0.0 {
            normal.iter_mut().for_each(|n| *n = -*n);
            offset = -offset;
        }
        self.vertices.extend_from_slice(verts);
        self.offsets.push(offset);
        true
    }

    /// Drops every facet for which `keep` is false, compacting in place.
    fn retain(&mut self, keep: impl Fn(usize) -> bool) {
        let d = self.d;
        let mut w = 0;
        for f in 0..self.len() {
            if !keep(f) {
                continue;
            }
            if w != f {
                self.vertices.copy_within(f * d..(f + 1) * d, w * d);
                self.normals.copy_within(f * d..(f + 1) * d, w * d);
                self.offsets[w] = self.offsets[f];
            }
            w += 1;
        }
        self.vertices.truncate(w * d);
        self.normals.truncate(w * d);
        self.offsets.truncate(w);
    }
}

/// Beneath-beyond convex hull of `real` (plus one auxiliary point above
/// their centroid), returning the facets that face downward in the last
/// coordinate. Facets are sorted vertex lists of indices into `real`,
/// concatenated with stride `real.dim()`.
fn lower_facets(real: &PointCloud) -> Option<Vec<usize>> {
    let d = real.dim();
    let n = real.len();
    if n == 0 || d < 2 {
        return None;
    }

    // The auxiliary point makes the cloud full-dimensional; every facet through
    // it faces upward.
    let mut pts = PointCloud::with_capacity(d, n + 1);
    for i in 0..n {
        pts.push(real.point(i));
    }
    let mut aux: Vec<f64> = (0..d)
        .map(|k| (0..n).map(|i| real.point(i)[k]).sum::<f64>() / n as f64)
        .collect();
    let e_max = (0..n).map(|i| real.point(i)[d - 1]).fold(f64::MIN, f64::max);
    let e_min = (0..n).map(|i| real.point(i)[d - 1]).fold(f64::MAX, f64::min);
    aux[d - 1] = e_max + 1.0 + (e_max - e_min);
    pts.push(&aux);
    let aux_index = n;

    // 1. Initial simplex: greedily add the point farthest from the current span.
    let mut simplex = vec![0usize];
    let mut basis: Vec<Vec<f64>> = Vec::new();
    while simplex.len() < d + 1 {
        let origin = pts.point(simplex[0]);
        let (best, dist) = (0..pts.len())
            .filter(|i| !simplex.contains(i))
            .map(|i| {
                let r = residual(pts.point(i), origin, &basis);
                (i, dot(&r, &r).sqrt())
            })
            .fold((usize::MAX, 0.0), |acc, (i, dist)| if dist > acc.1 { (i, dist) } else { acc });
        if best == usize::MAX || dist <= GEOMETRY_EPS {
            return None;
        }
        let r = residual(pts.point(best), origin, &basis);
        basis.push(r.iter().map(|x| x / dist).collect());
        simplex.push(best);
    }

    let interior: Vec<f64> = (0..d)
        .map(|k| simplex.iter().map(|&i| pts.point(i)[k]).sum::<f64>() / (d + 1) as f64)
        .collect();

    let mut facets = FacetBuffer::new(d);
    let mut verts = Vec::with_capacity(d);
    for skip in 0..simplex.len() {
        verts.clear();
        verts.extend(simplex.iter().enumerate().filter(|(k, _)| *k != skip).map(|(_, &v)| v));
        verts.sort_unstable();
        if !facets.push(&verts, &pts, &interior) {
            return None;
        }
    }

    // 2. Insert the remaining points, replacing the facets each one sees.
    for p in 0..pts.len() {
        if simplex.contains(&p) {
            continue;
        }
        let visible: Vec<bool> = (0..facets.len())
            .map(|f| facets.distance(f, pts.point(p)) > GEOMETRY_EPS)
            .collect();
        if !visible.iter().any(|&v| v) {
            continue;
        }

        // Horizon ridges belong to exactly one visible facet.
        let mut ridges: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        for f in (0..facets.len()).filter(|&f| visible[f]) {
            let fv = facets.vertices(f);
            for k in 0..d {
                let ridge: Vec<usize> = fv
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != k)
                    .map(|(_, &v)| v)
                    .collect();
                *ridges.entry(ridge).or_insert(0) += 1;
            }
        }

        facets.retain(|f| !visible[f]);
        for (mut ridge, _) in ridges.into_iter().filter(|(_, count)| *count == 1) {
            ridge.push(p);
            ridge.sort_unstable();
            facets.push(&ridge, &pts, &interior);
        }
    }

    // 3. Keep the downward-facing facets.
    let mut lower: Vec<&[usize]> = (0..facets.len())
        .filter(|&f| !facets.vertices(f).contains(&aux_index) && facets.normal(f)[d - 1] < -GEOMETRY_EPS)
        .map(|f| facets.vertices(f))
        .collect();
    lower.sort();
    Some(lower.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_basis_counts_independent_directions() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.5, 0.0];
        let d = [0.0, 1.0];
        assert_eq!(affine_basis(&[&a, &b, &c], 1e-9).len(), 1);
        assert_eq!(affine_basis(&[&a, &b, &c, &d], 1e-9).len(), 2);
    }

    fn cloud(rows: &[&[f64]]) -> PointCloud {
        let mut c = PointCloud::new(rows[0].len());
        for r in rows {
            c.push(r);
        }
        c
    }

    #[test]
    fn lower_facets_of_binary_cloud() {
        // x, energy: the middle point dips below the end-point line.
        let pts = cloud(&[&[0.0, -1.0], &[0.5, -1.6], &[1.0, -2.0]]);
        let lower = lower_facets(&pts).expect("hull");
        assert_eq!(lower, vec![0, 1, 1, 2]);
    }

    #[test]
    fn lower_facets_skip_points_above() {
        let pts = cloud(&[&[0.0, -1.0], &[0.5, -1.0], &[1.0, -2.0]]);
        let lower = lower_facets(&pts).expect("hull");
        assert_eq!(lower, vec![0, 2]);
    }

    #[test]
    fn lower_facets_of_ternary_cloud() {
        // Corners of the composition triangle plus one deep interior point.
        let pts = cloud(&[
            &[0.0, 0.0, 0.0],
            &[1.0, 0.0, 0.0],
            &[0.0, 1.0, 0.0],
            &[0.3, 0.3, -1.0],
        ]);
        let lower = lower_facets(&pts).expect("hull");
        assert_eq!(lower.len(), 9);
        assert!(lower.chunks(3).all(|f| f.contains(&3)));
    }

    #[test]
    fn facet_buffer_compacts_in_place() {
        let pts = cloud(&[&[0.0, 0.0], &[1.0, 0.0], &[0.0, 1.0]]);
        let interior = [0.3, 0.3];
        let mut facets = FacetBuffer::new(2);
        assert!(facets.push(&[0, 1], &pts, &interior));
        assert!(facets.push(&[0, 2], &pts, &interior));
        assert!(facets.push(&[1, 2], &pts, &interior));
        assert!(!facets.push(&[1, 1], &pts, &interior));

        facets.retain(|f| f != 1);
        assert_eq!(facets.len(), 2);
        assert_eq!(facets.vertices(1), &[1, 2]);
        assert!(facets.distance(1, &interior) < 0.0);
        assert!(facets.normal(0)[1] < 0.0);
    }
}
