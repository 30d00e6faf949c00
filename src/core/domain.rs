use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::{HullError, Result};

// --- Constants ---

/// Two compositions whose mole fractions all agree within this are the same.
pub const COMPOSITION_TOLERANCE: f64 = 1e-6;
/// Stable/unstable boundary in eV/atom.
pub const ENERGY_TOLERANCE: f64 = 1e-6;
/// Barycentric containment slack and zero-weight cutoff.
pub const WEIGHT_TOLERANCE: f64 = 1e-8;

pub const UNKNOWN_METHOD: &str = "Unknown";

// --- Composition ---

/// Element symbol -> amount (formula units or fractions). Sorted by symbol.
/// Deserialization goes through [`Composition::new`], so records read from
/// disk obey the same invariants as constructed ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct Composition {
    amounts: BTreeMap<String, f64>,
}

impl TryFrom<BTreeMap<String, f64>> for Composition {
    type Error = HullError;

    fn try_from(amounts: BTreeMap<String, f64>) -> Result<Self> {
        Self::new(amounts)
    }
}

impl From<Composition> for BTreeMap<String, f64> {
    fn from(c: Composition) -> Self {
        c.amounts
    }
}

fn formula_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Z][a-z]?)(\d*\.?\d*)").expect("formula pattern is valid")
    })
}

impl Composition {
    /// Builds a composition, dropping zero amounts and merging repeated symbols.
    pub fn new<I, S>(amounts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (symbol, amount) in amounts {
            let symbol = symbol.into();
            if !amount.is_finite() || amount < 0.0 {
                return Err(HullError::invalid_entry(
                    symbol,
                    format!("amount must be finite and non-negative, got {}", amount),
                ));
            }
            if amount > 0.0 {
                *map.entry(symbol).or_insert(0.0) += amount;
            }
        }
        let c = Self { amounts: map };
        c.validate()?;
        Ok(c)
    }

    /// Parses a flat formula such as `Fe2O3` or `Li0.5CoO2`.
    pub fn from_formula(formula: &str) -> Result<Self> {
        let compact: String = formula.chars().filter(|c| !c.is_whitespace()).collect();
        let re = formula_regex();

        let mut consumed = 0;
        let mut amounts = Vec::new();
        for cap in re.captures_iter(&compact) {
            let whole = cap.get(0).map(|m| m.as_str()).unwrap_or_default();
            consumed += whole.len();
            let symbol = &cap[1];
            let amount = match &cap[2] {
                "" => 1.0,
                raw => raw.parse::<f64>().map_err(|_| {
                    HullError::invalid_entry(formula, format!("bad amount '{}'", raw))
                })?,
            };
            amounts.push((symbol.to_string(), amount));
        }

        if consumed != compact.len() {
            return Err(HullError::invalid_entry(formula, "unparseable formula"));
        }
        Self::new(amounts)
    }

    /// Every amount finite and positive, at least one element.
    pub fn validate(&self) -> Result<()> {
        if let Some((el, amt)) = self.amounts.iter().find(|(_, a)| !a.is_finite() || **a <= 0.0) {
            return Err(HullError::invalid_entry(
                self.formula(),
                format!("amount of {} must be finite and positive, got {}", el, amt),
            ));
        }
        if self.amounts.is_empty() || self.num_atoms() <= 0.0 {
            return Err(HullError::invalid_entry(
                self.formula(),
                "composition needs at least one element with positive amount",
            ));
        }
        Ok(())
    }

    pub fn num_atoms(&self) -> f64 {
        self.amounts.values().sum()
    }

    pub fn amount(&self, element: &str) -> f64 {
        self.amounts.get(element).copied().unwrap_or(0.0)
    }

    /// Mole fraction of `element`; zero if absent.
    pub fn fraction(&self, element: &str) -> f64 {
        let n = self.num_atoms();
        if n <= 0.0 {
            return 0.0;
        }
        self.amount(element) / n
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.amounts.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.amounts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn is_element(&self) -> bool {
        self.amounts.len() == 1
    }

    /// Sorted symbols joined by `-`, e.g. `Fe-O`.
    pub fn chemsys(&self) -> String {
        self.elements().collect::<Vec<_>>().join("-")
    }

    /// Space separated formula with explicit amounts, e.g. `Fe2 O3`.
    pub fn formula(&self) -> String {
        self.amounts
            .iter()
            .map(|(el, amt)| format!("{}{}", el, format_amount(*amt)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Compact formula divided by the common factor, e.g. `Fe2O3`, `LiO`.
    pub fn reduced_formula(&self) -> String {
        let factor = self.reduction_factor();
        self.amounts
            .iter()
            .map(|(el, amt)| {
                let reduced = amt / factor;
                if (reduced - 1.0).abs() < 1e-8 {
                    el.clone()
                } else {
                    format!("{}{}", el, format_amount(reduced))
                }
            })
            .collect::<String>()
    }

    /// True when both compositions have the same mole fractions within `tol`.
    pub fn almost_equals(&self, other: &Composition, tol: f64) -> bool {
        let mut symbols: Vec<&str> = self.elements().chain(other.elements()).collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
            .iter()
            .all(|el| (self.fraction(el) - other.fraction(el)).abs() <= tol)
    }

    // Greatest common divisor of integral amounts; 1 for fractional ones.
    fn reduction_factor(&self) -> f64 {
        let integral = self
            .amounts
            .values()
            .all(|a| (a - a.round()).abs() < 1e-8 && *a >= 1.0);
        if !integral {
            return 1.0;
        }
        self.amounts
            .values()
            .map(|a| a.round() as u64)
            .fold(0, gcd)
            .max(1) as f64
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn format_amount(amount: f64) -> String {
    if (amount - amount.round()).abs() < 1e-8 {
        format!("{}", amount.round() as i64)
    } else {
        let s = format!("{:.6}", amount);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formula())
    }
}

// --- Evaluation Method ---

/// Label of the energy-evaluation method an entry came from (`GGA`, `R2SCAN`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationMethod(String);

impl EvaluationMethod {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EvaluationMethod {
    fn default() -> Self {
        Self(UNKNOWN_METHOD.to_string())
    }
}

impl From<&str> for EvaluationMethod {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for EvaluationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- The Core Entity ---

/// One computed energy for one composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Material identity shared by entries of the same material across methods.
    #[serde(default)]
    pub entry_id: Option<String>,
    pub composition: Composition,
    /// Total uncorrected energy (eV), not per atom.
    pub energy: f64,
    /// Total energy correction (eV) added on top of `energy`.
    #[serde(default)]
    pub correction: f64,
    #[serde(default)]
    pub correction_uncertainty: Option<f64>,
    #[serde(default)]
    pub evaluation_method: Option<EvaluationMethod>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(composition: Composition, energy: f64) -> Result<Self> {
        let e = Self {
            entry_id: None,
            composition,
            energy,
            correction: 0.0,
            correction_uncertainty: None,
            evaluation_method: None,
            parameters: BTreeMap::new(),
            data: BTreeMap::new(),
            last_updated: None,
        };
        e.validate()?;
        Ok(e)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.entry_id = Some(id.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<EvaluationMethod>) -> Self {
        self.evaluation_method = Some(method.into());
        self
    }

    pub fn with_correction(mut self, correction: f64) -> Self {
        self.correction = correction;
        self
    }

    /// Checks the invariants that field-by-field construction can bypass.
    pub fn validate(&self) -> Result<()> {
        self.composition.validate().map_err(|err| match err {
            HullError::InvalidEntry { detail, .. } => HullError::invalid_entry(self.label(), detail),
            other => other,
        })?;
        if !self.energy.is_finite() || !self.correction.is_finite() {
            return Err(HullError::invalid_entry(self.label(), "energy must be finite"));
        }
        Ok(())
    }

    pub fn corrected_energy(&self) -> f64 {
        self.energy + self.correction
    }

    pub fn energy_per_atom(&self) -> f64 {
        self.corrected_energy() / self.composition.num_atoms()
    }

    pub fn uncorrected_energy_per_atom(&self) -> f64 {
        self.energy / self.composition.num_atoms()
    }

    pub fn method(&self) -> EvaluationMethod {
        self.evaluation_method.clone().unwrap_or_default()
    }

    /// Identity used in logs and error messages.
    pub fn label(&self) -> String {
        match &self.entry_id {
            Some(id) => format!("{} ({})", id, self.composition.reduced_formula()),
            None => self.composition.reduced_formula(),
        }
    }
}

// --- Configuration Types ---

/// Numerical tolerances for hull construction and queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HullParams {
    pub composition_tolerance: f64,
    pub energy_tolerance: f64,
    pub weight_tolerance: f64,
}

impl Default for HullParams {
    fn default() -> Self {
        Self {
            composition_tolerance: COMPOSITION_TOLERANCE,
            energy_tolerance: ENERGY_TOLERANCE,
            weight_tolerance: WEIGHT_TOLERANCE,
        }
    }
}

/// How the batch driver splits a chemical system into hulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HullPartition {
    /// One hull for all methods of a chemical system.
    #[default]
    Combined,
    /// One hull per evaluation method.
    PerMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermoParams {
    pub hull: HullParams,
    pub partition: HullPartition,
    /// Most preferred evaluation method first.
    pub priority: Vec<EvaluationMethod>,
    pub sandboxes: Vec<String>,
    pub threads: usize,
}

impl Default for ThermoParams {
    fn default() -> Self {
        Self {
            hull: HullParams::default(),
            partition: HullPartition::Combined,
            priority: vec!["R2SCAN".into(), "GGA+U".into(), "GGA".into()],
            sandboxes: vec!["core".to_string()],
            threads: 4,
        }
    }
}
