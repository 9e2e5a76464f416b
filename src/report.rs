//! Alignment report builder.
//!
//! Walks a folder of cached diagnostics archives, resolves catalog metadata
//! for each MIDI/audio pair, recomputes the cosine distance matrix from the
//! cached spectrograms, and emits one tab-separated row per pair. Files are
//! processed in parallel and every unit returns its own `Result`, so a bad
//! archive is reported instead of aborting the batch.

use crate::alignment::{cosine_distance_matrix, get_scores};
use crate::archive::{load_gram, Diagnostics};
use crate::catalog::DatasetLookup;
use crate::models::{BatchOutcome, DiagnosticsKey};
use crate::progress::create_progress_bar;
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Parse `{dataset}_{row}_{md5}` from a diagnostics filename. The md5 and
/// row never contain underscores, so split from the right in case a dataset
/// name ever does.
pub fn parse_diagnostics_key(path: &Path) -> Result<DiagnosticsKey> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("unreadable diagnostics filename {}", path.display()))?;

    let mut parts = stem.rsplitn(3, '_');
    let (md5, row, dataset) = match (parts.next(), parts.next(), parts.next()) {
        (Some(md5), Some(row), Some(dataset)) if !dataset.is_empty() => (md5, row, dataset),
        _ => bail!("diagnostics filename {stem} is not dataset_row_md5"),
    };
    let row: usize = row
        .parse()
        .with_context(|| format!("row index {row} in {stem} is not an integer"))?;

    Ok(DiagnosticsKey {
        dataset: dataset.to_string(),
        row,
        midi_md5: md5.to_string(),
    })
}

/// Feature archive paths inside diagnostics may be relative to wherever the
/// alignment stage ran; fall back to resolving against the diagnostics file.
fn resolve_features_path(reference: &str, diagnostics_path: &Path) -> PathBuf {
    let direct = PathBuf::from(reference);
    if direct.exists() {
        return direct;
    }
    match diagnostics_path.parent() {
        Some(parent) => parent.join(reference),
        None => direct,
    }
}

/// Compute all report fields for one diagnostics file.
pub fn process_one_file(diagnostics_path: &Path, lookup: &DatasetLookup) -> Result<Vec<String>> {
    let key = parse_diagnostics_key(diagnostics_path)?;
    let audio_entry = lookup.audio_entry(&key.dataset, key.row)?;
    let midi_entry = lookup.midi_entry(&key.midi_md5)?;

    let diagnostics = Diagnostics::load(diagnostics_path)?;
    let midi_gram = load_gram(resolve_features_path(
        &diagnostics.midi_features_filename,
        diagnostics_path,
    ))?;
    let audio_gram = load_gram(resolve_features_path(
        &diagnostics.audio_features_filename,
        diagnostics_path,
    ))?;

    let distances = cosine_distance_matrix(&midi_gram, &audio_gram)?;
    let scores = get_scores(&distances, &diagnostics.p, &diagnostics.q, diagnostics.score)?;

    let mut row = vec![
        diagnostics_path.display().to_string(),
        key.dataset,
        key.row.to_string(),
        key.midi_md5,
        audio_entry.display_name(),
        midi_entry.display_name(),
    ];
    row.extend(scores.as_fields().iter().map(|s| s.to_string()));
    // Trailing blank field, kept for compatibility with the sheet consumers
    row.push(String::new());
    Ok(row)
}

/// All `.npz` files under the diagnostics folder, in path order.
pub fn find_diagnostics_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("diagnostics folder {} does not exist", dir.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "npz"))
        .collect();
    files.sort();
    Ok(files)
}

/// Process every diagnostics file in parallel, isolating per-file failures.
pub fn build_report(dir: &Path, lookup: &DatasetLookup) -> Result<BatchOutcome<Vec<String>>> {
    let files = find_diagnostics_files(dir)?;
    let pb = create_progress_bar(files.len() as u64, "Computing alignment rows");

    let results: Vec<(PathBuf, Result<Vec<String>>)> = files
        .into_par_iter()
        .map(|path| {
            let result = process_one_file(&path, lookup);
            pb.inc(1);
            (path, result)
        })
        .collect();

    let mut outcome = BatchOutcome::collect(results);
    // Deterministic output regardless of worker interleaving
    outcome.rows.sort();
    pb.finish_with_message(format!(
        "Computed {} rows ({} failed)",
        outcome.rows.len(),
        outcome.failures.len()
    ));
    Ok(outcome)
}

/// Write report rows as tab-separated lines.
pub fn write_tsv(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        writeln!(writer, "{}", row.join("\t"))
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
