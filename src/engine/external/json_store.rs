use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use parking_lot::Mutex;

use crate::analysis::document::MaterialDocument;
use crate::core::domain::Entry;
use crate::engine::store::{EntryQuery, RecordStore};

/// File-backed store: entries are read from one JSON array, documents are
/// kept in another JSON array keyed by `material_id`.
pub struct JsonStore {
    entries_path: PathBuf,
    documents_path: PathBuf,
    // Serializes read-modify-write cycles on the documents file.
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// # Arguments
    /// * `entries_path` - JSON array of entries.
    /// * `documents_path` - Output file; created on first upsert.
    pub fn new(entries_path: impl AsRef<Path>, documents_path: impl AsRef<Path>) -> Self {
        Self {
            entries_path: entries_path.as_ref().to_path_buf(),
            documents_path: documents_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn load_entries(&self) -> Result<Vec<Entry>> {
        let raw = fs::read_to_string(&self.entries_path)
            .with_context(|| format!("Failed to read entries from {}", self.entries_path.display()))?;
        let records: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse entries in {}", self.entries_path.display()))?;

        // Invalid records are skipped, not fatal for the whole file.
        let mut valid = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<Entry>(record) {
                Ok(e) => match e.validate() {
                    Ok(()) => valid.push(e),
                    Err(err) => warn!("Skipping entry #{}: {}", i, err),
                },
                Err(err) => warn!("Skipping entry #{}: {}", i, err),
            }
        }
        Ok(valid)
    }

    fn load_documents(&self) -> Result<BTreeMap<String, MaterialDocument>> {
        if !self.documents_path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.documents_path)
            .with_context(|| format!("Failed to read documents from {}", self.documents_path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let docs: Vec<MaterialDocument> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse documents in {}", self.documents_path.display()))?;
        Ok(docs.into_iter().map(|d| (d.material_id.clone(), d)).collect())
    }
}

impl RecordStore for JsonStore {
    fn entries(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        let entries: Vec<Entry> = self
            .load_entries()?
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();
        info!("Loaded {} entries from {}", entries.len(), self.entries_path.display());
        Ok(entries)
    }

    fn upsert(&self, docs: &[MaterialDocument]) -> Result<usize> {
        let _guard = self.write_lock.lock();

        let mut existing = self.load_documents()?;
        for doc in docs {
            if doc.material_id.is_empty() {
                bail!("Refusing to store a document without material_id");
            }
            existing.insert(doc.material_id.clone(), doc.clone());
        }

        let all: Vec<&MaterialDocument> = existing.values().collect();
        let json = serde_json::to_string_pretty(&all).context("Failed to serialize documents")?;
        fs::write(&self.documents_path, json)
            .with_context(|| format!("Failed to write {}", self.documents_path.display()))?;
        Ok(docs.len())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}
