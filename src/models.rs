//! Core data models for the alignment tooling.
//!
//! This module contains the struct definitions, type aliases, and enums
//! shared by the extraction, report, and indexing pipelines.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::PathBuf;

// ============================================================================
// Type Aliases
// ============================================================================

/// Index mapping a clean_midi md5 to its row in the dataset list.
pub type Md5Index = FxHashMap<String, usize>;

/// Per-dataset catalog lists keyed by dataset name.
pub type DatasetLists = FxHashMap<String, Vec<CatalogEntry>>;

// ============================================================================
// Catalog Models
// ============================================================================

/// One record from a dataset index file (a JSON array of song metadata).
/// Records are keyed by position in the array; `md5` is only present for
/// the clean_midi dataset.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl CatalogEntry {
    /// Human-readable "{artist} - {title}" name used in reports.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Flat record written into the search index.
#[derive(Clone, Debug)]
pub struct IndexRecord {
    pub id: String,
    pub path: String,
    pub artist: String,
    pub title: String,
}

// ============================================================================
// Diagnostics Filename Fields
// ============================================================================

/// Fields parsed from a diagnostics filename of the form
/// `{dataset}_{row}_{md5}.npz`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticsKey {
    pub dataset: String,
    pub row: usize,
    pub midi_md5: String,
}

// ============================================================================
// Batch Outcome
// ============================================================================

/// One failed unit of batch work, kept so a single bad file does not abort
/// the whole run.
#[derive(Debug)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub error: anyhow::Error,
}

/// Aggregated result of a parallel batch: successes in input order plus the
/// failures that were isolated along the way.
#[derive(Debug, Default)]
pub struct BatchOutcome<T> {
    pub rows: Vec<T>,
    pub failures: Vec<BatchFailure>,
}

impl<T> BatchOutcome<T> {
    /// Split per-item results into successes and failures.
    pub fn collect(results: Vec<(PathBuf, anyhow::Result<T>)>) -> Self {
        let mut outcome = BatchOutcome {
            rows: Vec::new(),
            failures: Vec::new(),
        };
        for (path, result) in results {
            match result {
                Ok(row) => outcome.rows.push(row),
                Err(error) => outcome.failures.push(BatchFailure { path, error }),
            }
        }
        outcome
    }

    /// Print isolated failures to stderr, one block per file.
    pub fn report_failures(&self) {
        for failure in &self.failures {
            eprintln!("FAILED {}: {:#}", failure.path.display(), failure.error);
        }
    }
}
