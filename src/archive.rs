//! Compressed array archives.
//!
//! Two `.npz` layouts are shared across the pipeline:
//!
//! - spectrogram archives hold a single `gram` array (f32, rows = frames);
//! - diagnostics archives hold the alignment path (`p`, `q`), the scalar
//!   `score`, and the spectrogram archive paths as UTF-8 byte arrays under
//!   `midi_features_filename` / `audio_features_filename`.
//!
//! Both are write-once artifacts consumed by downstream batch jobs.

use anyhow::{Context, Result};
use ndarray::{Array0, Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::File;
use std::path::Path;

/// Write a post-processed spectrogram to a compressed archive.
pub fn save_gram<P: AsRef<Path>>(path: P, gram: &Array2<f32>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut npz = NpzWriter::new_compressed(file);
    npz.add_array("gram", gram)
        .with_context(|| format!("failed to write gram to {}", path.display()))?;
    npz.finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    Ok(())
}

/// Load a cached spectrogram archive.
pub fn load_gram<P: AsRef<Path>>(path: P) -> Result<Array2<f32>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut npz = NpzReader::new(file)
        .with_context(|| format!("malformed archive {}", path.display()))?;
    let gram: Array2<f32> = npz
        .by_name("gram")
        .with_context(|| format!("missing gram array in {}", path.display()))?;
    Ok(gram)
}

/// Cached intermediate results for one alignment attempt.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    /// MIDI-side alignment path indices.
    pub p: Vec<i64>,
    /// Audio-side alignment path indices.
    pub q: Vec<i64>,
    /// Raw alignment score from the alignment stage.
    pub score: f64,
    /// Path to the MIDI spectrogram archive.
    pub midi_features_filename: String,
    /// Path to the audio spectrogram archive.
    pub audio_features_filename: String,
}

impl Diagnostics {
    /// Read a diagnostics archive.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut npz = NpzReader::new(file)
            .with_context(|| format!("malformed archive {}", path.display()))?;

        let p: Array1<i64> = npz
            .by_name("p")
            .with_context(|| format!("missing p in {}", path.display()))?;
        let q: Array1<i64> = npz
            .by_name("q")
            .with_context(|| format!("missing q in {}", path.display()))?;
        let score: Array0<f64> = npz
            .by_name("score")
            .with_context(|| format!("missing score in {}", path.display()))?;
        let midi_features_filename = read_string(&mut npz, "midi_features_filename", path)?;
        let audio_features_filename = read_string(&mut npz, "audio_features_filename", path)?;

        Ok(Self {
            p: p.to_vec(),
            q: q.to_vec(),
            score: score.into_scalar(),
            midi_features_filename,
            audio_features_filename,
        })
    }

    /// Write a diagnostics archive. The alignment stage and the tests are
    /// the only writers; records are immutable once written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array("p", &Array1::from_vec(self.p.clone()))?;
        npz.add_array("q", &Array1::from_vec(self.q.clone()))?;
        npz.add_array("score", &Array0::from_elem((), self.score))?;
        npz.add_array(
            "midi_features_filename",
            &Array1::from_vec(self.midi_features_filename.as_bytes().to_vec()),
        )?;
        npz.add_array(
            "audio_features_filename",
            &Array1::from_vec(self.audio_features_filename.as_bytes().to_vec()),
        )?;
        npz.finish()
            .with_context(|| format!("failed to finish {}", path.display()))?;
        Ok(())
    }
}

/// Filename references are stored as UTF-8 byte arrays; the archive format
/// has no native string payload here.
fn read_string(npz: &mut NpzReader<File>, name: &str, path: &Path) -> Result<String> {
    let bytes: Array1<u8> = npz
        .by_name(name)
        .with_context(|| format!("missing {} in {}", name, path.display()))?;
    String::from_utf8(bytes.to_vec())
        .with_context(|| format!("{} in {} is not UTF-8", name, path.display()))
}

// ============================================================================
// TESTS
// ============================================================================
