use std::collections::BTreeMap;

use anyhow::Result;
use parking_lot::RwLock;

use crate::analysis::document::MaterialDocument;
use crate::core::chemistry::ChemicalSystem;
use crate::core::domain::Entry;

/// Which entries to pull from a store.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryQuery {
    All,
    /// Entries whose elements all lie in this system (e.g. `"Fe-O"`).
    Chemsys(String),
    Ids(Vec<String>),
}

impl EntryQuery {
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            EntryQuery::All => true,
            EntryQuery::Chemsys(chemsys) => {
                ChemicalSystem::new(chemsys.split('-')).contains(&entry.composition)
            }
            EntryQuery::Ids(ids) => entry
                .entry_id
                .as_ref()
                .is_some_and(|id| ids.iter().any(|i| i == id)),
        }
    }
}

/// A source of entries and sink for thermo documents.
/// Implementations must be thread-safe.
pub trait RecordStore: Send + Sync {
    fn entries(&self, query: &EntryQuery) -> Result<Vec<Entry>>;

    /// Inserts or replaces documents keyed by `material_id`.
    /// Returns the number of documents written.
    fn upsert(&self, docs: &[MaterialDocument]) -> Result<usize>;

    fn name(&self) -> &str;
}

/// Keeps everything in memory; handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Vec<Entry>>,
    documents: RwLock<BTreeMap<String, MaterialDocument>>,
}

impl MemoryStore {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn document(&self, material_id: &str) -> Option<MaterialDocument> {
        self.documents.read().get(material_id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }
}

impl RecordStore for MemoryStore {
    fn entries(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    fn upsert(&self, docs: &[MaterialDocument]) -> Result<usize> {
        let mut store = self.documents.write();
        for doc in docs {
            store.insert(doc.material_id.clone(), doc.clone());
        }
        Ok(docs.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
