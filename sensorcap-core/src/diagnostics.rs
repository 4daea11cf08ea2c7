//! Diagnostics handed explicitly to each component.
//!
//! Components receive a [`Diagnostics`] handle at construction and report
//! every skipped record or degraded lookup through it. Each report is also
//! emitted as a `tracing` event so a subscriber installed by the binary sees
//! it without the library holding any global logger.

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// A single reported condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Component that raised it, e.g. `"decoder"` or `"correlator"`
    pub source: &'static str,
    pub message: String,
}

/// Entries kept by [`Diagnostics::new`]; later ones are only counted.
pub const DEFAULT_RETAINED: usize = 1024;

#[derive(Debug)]
struct Log {
    entries: Vec<Diagnostic>,
    limit: usize,
    warnings: usize,
    dropped: usize,
}

/// Cloneable collector shared by the components working on one run.
///
/// At most `limit` entries are kept in memory. Every report still reaches
/// `tracing` and the counters.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    log: Arc<Mutex<Log>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_limit(DEFAULT_RETAINED)
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` entries.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log {
                entries: Vec::new(),
                limit,
                warnings: 0,
                dropped: 0,
            })),
        }
    }

    /// Records a warning and mirrors it to `tracing`.
    pub fn warn(&self, source: &'static str, message: impl Into<String>) {
        let message = message.into();
        warn!(source, "{}", message);
        self.push(Diagnostic {
            severity: Severity::Warning,
            source,
            message,
        });
    }

    /// Records an informational note and mirrors it to `tracing`.
    pub fn info(&self, source: &'static str, message: impl Into<String>) {
        let message = message.into();
        info!(source, "{}", message);
        self.push(Diagnostic {
            severity: Severity::Info,
            source,
            message,
        });
    }

    /// Snapshot of the retained entries.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.lock().entries.clone()
    }

    /// Number of warnings reported so far, retained or not.
    pub fn warning_count(&self) -> usize {
        self.lock().warnings
    }

    /// Entries reported but not retained since the last [`drain`](Self::drain).
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    /// Removes and returns the retained entries, making room for new ones.
    ///
    /// The warning count is not reset.
    pub fn drain(&self) -> Vec<Diagnostic> {
        let mut log = self.lock();
        log.dropped = 0;
        std::mem::take(&mut log.entries)
    }

    fn push(&self, diagnostic: Diagnostic) {
        let mut log = self.lock();
        if diagnostic.severity == Severity::Warning {
            log.warnings += 1;
        }
        if log.entries.len() < log.limit {
            log.entries.push(diagnostic);
        } else {
            log.dropped += 1;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Log> {
        // A panic while holding the lock cannot leave the log half-written.
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}
