/// Summary of one processed chemical system.
/// Used for progress reporting and the CSV summary.
#[derive(Debug, Clone, Default)]
pub struct SystemStats {
    pub chemsys: String,
    pub entries: usize,
    pub compositions: usize,
    pub facets: usize,
    pub stable: usize,
    pub unstable: usize,
    pub failures: usize,
    pub documents: usize,
    pub elapsed_ms: u128,
}

/// Events emitted by the batch driver to the caller's thread.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// Diagnostic log message.
    Log(String),

    /// A chemical system was evaluated (possibly with per-entry failures).
    SystemFinished(SystemStats),

    /// A chemical system could not be evaluated at all.
    SystemFailed { chemsys: String, error: String },

    /// All systems are done.
    Finished,
}

pub mod batch;
