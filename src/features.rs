//! Feature extraction pipeline.
//!
//! Computes the log-scaled, L2-normalized constant-Q spectrograms used by
//! the alignment stage, for both synthesized MIDI and raw audio. The row
//! normalization is a contract: rows are directly comparable by cosine
//! distance regardless of absolute loudness.

use crate::cqt::{amplitude_to_db, cqt, midi_to_hz};
use crate::score::MidiScore;
use crate::synth;
use anyhow::Result;
use ndarray::{Array2, Axis};

/// Sample rate for raw audio input.
pub const AUDIO_FS: u32 = 22050;
/// Hop size for raw audio at `AUDIO_FS`.
pub const AUDIO_HOP: usize = 1024;
/// Sample rate for MIDI-synthesized audio.
pub const MIDI_FS: u32 = 11025;
/// Hop size for synthesized audio at `MIDI_FS`.
pub const MIDI_HOP: usize = 512;
/// First log-frequency bin, as a MIDI note number (C2).
pub const NOTE_START: u32 = 36;
/// Number of log-frequency bins.
pub const N_NOTES: usize = 48;

/// dB floor used when log-scaling magnitudes.
const AMIN: f32 = 1e-5;
/// Dynamic range below the peak retained after log-scaling.
const TOP_DB: f32 = 80.0;

/// Synthesize a MIDI score, compute its constant-Q spectrogram, log-scale
/// and normalize it.
pub fn midi_cqt(score: &MidiScore) -> Result<Array2<f32>> {
    let midi_audio = synth::fast_fluidsynth(score, MIDI_FS)?;
    let gram = cqt(
        &midi_audio,
        MIDI_FS,
        MIDI_HOP,
        midi_to_hz(NOTE_START as f32),
        N_NOTES,
        12,
    )?;
    Ok(post_process_cqt(&gram))
}

/// Compute some audio data's constant-Q spectrogram, log-scale and
/// normalize it. `fs` defaults to [`AUDIO_FS`] at the call sites.
pub fn audio_cqt(audio: &[f32], fs: u32) -> Result<Array2<f32>> {
    let gram = cqt(audio, fs, AUDIO_HOP, midi_to_hz(NOTE_START as f32), N_NOTES, 12)?;
    Ok(post_process_cqt(&gram))
}

/// Normalize and log-scale a constant-Q spectrogram.
///
/// Input is `(bins, frames)` magnitude; output is `(frames, bins)` with the
/// log magnitude referenced to the maximum and each row L2-normalized.
pub fn post_process_cqt(gram: &Array2<f32>) -> Array2<f32> {
    let db = amplitude_to_db(gram, AMIN, Some(TOP_DB));
    let mut out = db.t().to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-10 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Times in seconds corresponding to the rows of a post-processed
/// spectrogram, at the fixed audio rate and hop.
pub fn frame_times(gram: &Array2<f32>) -> Vec<f32> {
    (0..gram.shape()[0])
        .map(|i| (i * AUDIO_HOP) as f32 / AUDIO_FS as f32)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn tone(freq: f32, sr: u32, duration: f32) -> Vec<f32> {
        let n = (duration * sr as f32) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_audio_cqt_rows_unit_norm() {
        let signal = tone(261.6, AUDIO_FS, 1.0);
        let gram = audio_cqt(&signal, AUDIO_FS).unwrap();

        assert_eq!(gram.shape()[1], N_NOTES);
        for row in gram.axis_iter(Axis(0)) {
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_post_process_transposes() {
        let gram = Array2::<f32>::from_elem((N_NOTES, 7), 0.5);
        let out = post_process_cqt(&gram);
        assert_eq!(out.shape(), &[7, N_NOTES]);
    }

    #[test]
    fn test_post_process_loudness_invariant() {
        let signal = tone(440.0, AUDIO_FS, 0.5);
        let quiet: Vec<f32> = signal.iter().map(|v| v * 0.05).collect();

        let loud_gram = audio_cqt(&signal, AUDIO_FS).unwrap();
        let quiet_gram = audio_cqt(&quiet, AUDIO_FS).unwrap();

        // dB scaling is referenced to each gram's own maximum, so a global
        // gain change leaves the normalized rows essentially unchanged
        let frames = loud_gram.shape()[0].min(quiet_gram.shape()[0]);
        for t in 0..frames {
            let dot: f32 = (0..N_NOTES)
                .map(|b| loud_gram[(t, b)] * quiet_gram[(t, b)])
                .sum();
            assert!(dot > 0.99, "frame {t} cosine {dot}");
        }
    }

    #[test]
    fn test_frame_times_monotone_and_sized() {
        let signal = tone(440.0, AUDIO_FS, 1.0);
        let gram = audio_cqt(&signal, AUDIO_FS).unwrap();
        let times = frame_times(&gram);

        assert_eq!(times.len(), gram.shape()[0]);
        assert_eq!(times[0], 0.0);
        for pair in times.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        // Second frame is one hop later
        assert_relative_eq!(times[1], AUDIO_HOP as f32 / AUDIO_FS as f32, epsilon = 1e-6);
    }
}
