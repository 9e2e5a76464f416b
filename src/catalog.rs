//! Dataset index catalog.
//!
//! Dataset index files are JSON arrays of song metadata records living at
//! `<base>/<dataset>/index.js`; records are keyed by their position in the
//! array. The lookup structure is built once in main and passed into the
//! batch functions, replacing module-level state.

use crate::models::{CatalogEntry, DatasetLists, Md5Index};
use anyhow::{bail, Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Dataset whose entries carry the MIDI md5 identifiers.
pub const MIDI_DATASET: &str = "clean_midi";

/// Audio datasets the alignment runs cover by default.
pub const DEFAULT_DATASETS: &[&str] = &["uspop2002", "cal10k", "cal500"];

/// All dataset index lists for a run, plus an md5 index over the MIDI side.
#[derive(Debug)]
pub struct DatasetLookup {
    base: PathBuf,
    lists: DatasetLists,
    md5_index: Md5Index,
}

impl DatasetLookup {
    /// Load the named audio dataset indices plus the clean_midi index from
    /// `<base>/<dataset>/index.js`.
    pub fn load<P: AsRef<Path>>(base: P, datasets: &[String]) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let mut lists: DatasetLists = FxHashMap::default();

        for dataset in datasets.iter().map(String::as_str).chain([MIDI_DATASET]) {
            if lists.contains_key(dataset) {
                continue;
            }
            lists.insert(dataset.to_string(), load_index(&base, dataset)?);
        }

        // md5 -> row over clean_midi; a duplicated md5 would make report
        // rows ambiguous, so it is rejected up front
        let mut md5_index: Md5Index = FxHashMap::default();
        for (row, entry) in lists[MIDI_DATASET].iter().enumerate() {
            if let Some(md5) = &entry.md5 {
                if md5_index.insert(md5.clone(), row).is_some() {
                    bail!("duplicate md5 {md5} in {MIDI_DATASET} index");
                }
            }
        }

        Ok(Self {
            base,
            lists,
            md5_index,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn dataset(&self, name: &str) -> Result<&[CatalogEntry]> {
        match self.lists.get(name) {
            Some(list) => Ok(list),
            None => bail!("dataset {name} was not loaded"),
        }
    }

    /// Catalog entry for an audio dataset row.
    pub fn audio_entry(&self, dataset: &str, row: usize) -> Result<&CatalogEntry> {
        let list = self.dataset(dataset)?;
        list.get(row)
            .with_context(|| format!("row {row} out of range for dataset {dataset} ({} entries)", list.len()))
    }

    /// Catalog entry for a clean_midi md5.
    pub fn midi_entry(&self, md5: &str) -> Result<&CatalogEntry> {
        let row = *self
            .md5_index
            .get(md5)
            .with_context(|| format!("md5 {md5} not present in {MIDI_DATASET} index"))?;
        Ok(&self.lists[MIDI_DATASET][row])
    }
}

fn load_index(base: &Path, dataset: &str) -> Result<Vec<CatalogEntry>> {
    let path = base.join(dataset).join("index.js");
    let file =
        File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    let entries: Vec<CatalogEntry> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("malformed dataset index {}", path.display()))?;
    Ok(entries)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_index(base: &Path, dataset: &str, json: &str) {
        let dir = base.join(dataset);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.js"), json).unwrap();
    }

    fn fixture(dir: &Path) {
        write_index(
            dir,
            "uspop2002",
            r#"[{"artist": "The Beatles", "title": "Let It Be"},
                {"artist": "Queen", "title": "Under Pressure"}]"#,
        );
        write_index(
            dir,
            MIDI_DATASET,
            r#"[{"artist": "Beatles", "title": "Let It Be", "md5": "aa11"},
                {"artist": "Queen", "title": "Under Pressure", "md5": "bb22"}]"#,
        );
    }

    #[test]
    fn test_lookup_by_row_and_md5() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let lookup = DatasetLookup::load(dir.path(), &["uspop2002".to_string()]).unwrap();

        let audio = lookup.audio_entry("uspop2002", 1).unwrap();
        assert_eq!(audio.display_name(), "Queen - Under Pressure");

        let midi = lookup.midi_entry("aa11").unwrap();
        assert_eq!(midi.artist, "Beatles");
    }

    #[test]
    fn test_missing_md5_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let lookup = DatasetLookup::load(dir.path(), &["uspop2002".to_string()]).unwrap();
        assert!(lookup.midi_entry("ff99").is_err());
    }

    #[test]
    fn test_out_of_range_row_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let lookup = DatasetLookup::load(dir.path(), &["uspop2002".to_string()]).unwrap();
        assert!(lookup.audio_entry("uspop2002", 7).is_err());
        assert!(lookup.audio_entry("cal500", 0).is_err());
    }

    #[test]
    fn test_duplicate_md5_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), "uspop2002", "[]");
        write_index(
            dir.path(),
            MIDI_DATASET,
            r#"[{"artist": "A", "title": "X", "md5": "aa11"},
                {"artist": "B", "title": "Y", "md5": "aa11"}]"#,
        );

        assert!(DatasetLookup::load(dir.path(), &["uspop2002".to_string()]).is_err());
    }
}
