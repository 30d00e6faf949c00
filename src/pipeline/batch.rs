use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crossbeam_channel::Sender;
use log::{info, warn};
use rayon::prelude::*;
use uuid::Uuid;

use crate::analysis::document::{MaterialDocument, MaterialDocumentSynthesizer};
use crate::core::chemistry::ChemicalSystem;
use crate::core::domain::{Entry, EvaluationMethod, HullPartition, ThermoParams};
use crate::core::error::HullError;
use crate::engine::evaluator::{StabilityEvaluator, StabilityResult};
use crate::engine::hull::ConvexHullBuilder;
use crate::engine::reference::resolve_references;
use crate::pipeline::{BatchEvent, SystemStats};

/// A single entry (or material) that could not be evaluated.
#[derive(Debug, Clone)]
pub struct EntryFailure {
    pub chemsys: String,
    pub entry: String,
    pub error: HullError,
}

/// A chemical system whose hull could not be built.
#[derive(Debug, Clone)]
pub struct SystemFailure {
    pub chemsys: String,
    pub error: HullError,
}

#[derive(Debug, Clone)]
pub struct SystemReport {
    pub documents: Vec<MaterialDocument>,
    pub failures: Vec<EntryFailure>,
    /// Non-fatal problems, e.g. missing elemental references.
    pub warnings: Vec<HullError>,
    pub stats: SystemStats,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub documents: Vec<MaterialDocument>,
    pub entry_failures: Vec<EntryFailure>,
    pub system_failures: Vec<SystemFailure>,
    pub warnings: Vec<(String, HullError)>,
    pub stats: Vec<SystemStats>,
}

/// Runs the full thermo pipeline over many chemical systems.
pub struct ThermoBuilder {
    params: ThermoParams,
    synthesizer: MaterialDocumentSynthesizer,
}

impl ThermoBuilder {
    pub fn new(params: ThermoParams) -> Self {
        let synthesizer = MaterialDocumentSynthesizer::from_params(&params);
        Self { params, synthesizer }
    }

    pub fn params(&self) -> &ThermoParams {
        &self.params
    }

    /// Splits entries into maximal chemical systems. Each system receives every
    /// entry whose elements it contains, so subsystem entries can appear in
    /// more than one system.
    pub fn group_by_chemsys(entries: &[Entry]) -> Vec<(ChemicalSystem, Vec<Entry>)> {
        let systems: BTreeSet<Vec<String>> = entries
            .iter()
            .map(|e| e.composition.elements().map(str::to_string).collect())
            .collect();
        let systems: Vec<ChemicalSystem> = systems.into_iter().map(ChemicalSystem::new).collect();

        let maximal: Vec<&ChemicalSystem> = systems
            .iter()
            .filter(|s| !systems.iter().any(|o| o != *s && s.is_subsystem_of(o)))
            .collect();

        maximal
            .into_iter()
            .map(|sys| {
                let members = entries
                    .iter()
                    .filter(|e| sys.contains(&e.composition))
                    .cloned()
                    .collect();
                (sys.clone(), members)
            })
            .collect()
    }

    /// Evaluates every entry of one chemical system and synthesizes one
    /// document per material. Fails only if a hull cannot be built.
    pub fn process_system(
        &self,
        system: &ChemicalSystem,
        entries: &[Entry],
    ) -> Result<SystemReport, HullError> {
        let start = Instant::now();
        let chemsys = system.chemsys();
        let mut stats = SystemStats {
            chemsys: chemsys.clone(),
            entries: entries.len(),
            ..Default::default()
        };

        let partitions: Vec<Vec<Entry>> = match self.params.partition {
            HullPartition::Combined => vec![entries.to_vec()],
            HullPartition::PerMethod => {
                let mut by_method: BTreeMap<EvaluationMethod, Vec<Entry>> = BTreeMap::new();
                for e in entries {
                    by_method.entry(e.method()).or_default().push(e.clone());
                }
                by_method.into_values().collect()
            }
        };

        let mut results: Vec<StabilityResult> = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        for part in &partitions {
            let references = resolve_references(part);
            if let Err(e) = references.ensure_complete() {
                warnings.push(e);
            }

            // 1. Hull (sequential, must finish before any evaluation).
            let hull = ConvexHullBuilder::new(self.params.hull).build(part)?;
            stats.compositions += hull.composition_count();
            stats.facets += hull.facet_count();

            // 2. Parallel evaluation against the shared hull.
            let evaluator = StabilityEvaluator::new(&hull, &references);
            for (entry, outcome) in part.iter().zip(evaluator.evaluate_all()) {
                match outcome {
                    Ok(r) => results.push(r),
                    Err(error) => {
                        warn!("{}: {}", chemsys, error);
                        failures.push(EntryFailure {
                            chemsys: chemsys.clone(),
                            entry: entry.label(),
                            error,
                        });
                    }
                }
            }
        }

        stats.stable = results.iter().filter(|r| r.is_stable).count();
        stats.unstable = results.len() - stats.stable;

        // 3. One document per material identity.
        let evaluated: Vec<Entry> = results.iter().map(|r| r.entry.clone()).collect();
        let mut documents = Vec::new();
        for (material_id, idx) in MaterialDocumentSynthesizer::group_by_material(&evaluated) {
            let es: Vec<Entry> = idx.iter().map(|&i| evaluated[i].clone()).collect();
            let rs: Vec<StabilityResult> = idx.iter().map(|&i| results[i].clone()).collect();
            match self.synthesizer.synthesize(&material_id, &es, &rs) {
                Ok(doc) => documents.push(doc),
                Err(error) => failures.push(EntryFailure {
                    chemsys: chemsys.clone(),
                    entry: material_id,
                    error,
                }),
            }
        }

        stats.failures = failures.len();
        stats.documents = documents.len();
        stats.elapsed_ms = start.elapsed().as_millis();

        Ok(SystemReport {
            documents,
            failures,
            warnings,
            stats,
        })
    }

    /// Processes every chemical system in parallel. Progress is streamed on
    /// `tx`; a dropped receiver does not stop the run.
    pub fn run(&self, entries: Vec<Entry>, tx: &Sender<BatchEvent>) -> BatchReport {
        let mut report = BatchReport::default();

        // Invalid entries are per-entry failures; unnamed ones get an identity
        // that stays stable across the systems they appear in.
        let mut valid = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if let Err(error) = entry.validate() {
                report.entry_failures.push(EntryFailure {
                    chemsys: entry.composition.chemsys(),
                    entry: entry.label(),
                    error,
                });
                continue;
            }
            if entry.entry_id.is_none() {
                entry.entry_id = Some(Uuid::new_v4().to_string());
            }
            valid.push(entry);
        }

        let systems = Self::group_by_chemsys(&valid);
        let _ = tx.send(BatchEvent::Log(format!(
            "Processing {} entries in {} chemical systems",
            valid.len(),
            systems.len()
        )));

        let outcomes: Vec<(String, Result<SystemReport, HullError>)> = systems
            .par_iter()
            .map(|(system, members)| {
                let outcome = self.process_system(system, members);
                match &outcome {
                    Ok(r) => {
                        let _ = tx.send(BatchEvent::SystemFinished(r.stats.clone()));
                    }
                    Err(e) => {
                        let _ = tx.send(BatchEvent::SystemFailed {
                            chemsys: system.chemsys(),
                            error: e.to_string(),
                        });
                    }
                }
                (system.chemsys(), outcome)
            })
            .collect();

        // Subsystem materials are evaluated in every enclosing system; keep the first.
        let mut seen = BTreeSet::new();
        for (chemsys, outcome) in outcomes {
            match outcome {
                Ok(r) => {
                    report.documents.extend(
                        r.documents
                            .into_iter()
                            .filter(|d| seen.insert(d.material_id.clone())),
                    );
                    report.entry_failures.extend(r.failures);
                    report
                        .warnings
                        .extend(r.warnings.into_iter().map(|w| (chemsys.clone(), w)));
                    report.stats.push(r.stats);
                }
                Err(error) => {
                    warn!("Skipping {}: {}", chemsys, error);
                    report.system_failures.push(SystemFailure { chemsys, error });
                }
            }
        }

        info!(
            "Batch finished: {} documents, {} entry failures, {} system failures",
            report.documents.len(),
            report.entry_failures.len(),
            report.system_failures.len()
        );
        let _ = tx.send(BatchEvent::Finished);
        report
    }
}
