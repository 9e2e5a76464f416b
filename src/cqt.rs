//! Constant-Q transform primitives.
//!
//! A compact CQT with logarithmically spaced frequency bins matching musical
//! pitch intervals: per-bin center frequencies geometrically spaced from
//! `fmin`, one Hann-windowed FFT per frame, linear interpolation of FFT bins
//! onto the CQT bins, and per-bin filter-length scaling.

use anyhow::{bail, Result};
use ndarray::Array2;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Forward FFT plan cached for reuse across frames.
struct FftPlan {
    forward: Arc<dyn Fft<f32>>,
}

impl FftPlan {
    fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: planner.plan_fft_forward(len),
        }
    }

    fn forward(&self, buffer: &mut [Complex32]) {
        self.forward.process(buffer);
    }
}

/// Convert a MIDI note number to frequency in Hz (A440 tuning).
pub fn midi_to_hz(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

/// Center frequencies for `n_bins` CQT bins starting at `fmin`.
pub fn cqt_frequencies(n_bins: usize, fmin: f32, bins_per_octave: usize) -> Vec<f32> {
    (0..n_bins)
        .map(|i| fmin * 2.0_f32.powf(i as f32 / bins_per_octave as f32))
        .collect()
}

/// Compute the magnitude constant-Q spectrogram of an audio signal.
///
/// Returns an array of shape `(n_bins, n_frames)`.
///
/// # Errors
/// Fails on empty or non-finite input, or when `n_bins` or
/// `bins_per_octave` is zero.
pub fn cqt(
    y: &[f32],
    sr: u32,
    hop_length: usize,
    fmin: f32,
    n_bins: usize,
    bins_per_octave: usize,
) -> Result<Array2<f32>> {
    if y.is_empty() {
        bail!("empty audio signal");
    }
    if !y.iter().all(|v| v.is_finite()) {
        bail!("audio signal contains non-finite values");
    }
    if n_bins == 0 || bins_per_octave == 0 {
        bail!("n_bins and bins_per_octave must be greater than zero");
    }
    if hop_length == 0 {
        bail!("hop_length must be greater than zero");
    }

    let freqs = cqt_frequencies(n_bins, fmin, bins_per_octave);

    // Per-bin filter lengths from the constant Q factor
    let q = 1.0 / (2.0_f32.powf(1.0 / bins_per_octave as f32) - 1.0);
    let lengths: Vec<usize> = freqs
        .iter()
        .map(|&f| ((sr as f32 / f * q).ceil() as usize).max(1))
        .collect();

    // FFT long enough for the widest (lowest-frequency) filter
    let max_len = lengths.iter().copied().max().unwrap_or(2048);
    let n_fft = max_len.next_power_of_two().max(512);

    let n_frames = if y.len() > n_fft / 2 {
        (y.len() - n_fft / 2) / hop_length + 1
    } else {
        1
    };

    let fft = FftPlan::new(n_fft);
    let mut gram = Array2::<f32>::zeros((n_bins, n_frames));
    let mut buffer = vec![Complex32::new(0.0, 0.0); n_fft];

    for frame_idx in 0..n_frames {
        let center = frame_idx * hop_length + n_fft / 2;

        // Extract the frame centered on `center` and apply a Hann window
        for (i, buf) in buffer.iter_mut().enumerate() {
            let sample_idx = center as isize - (n_fft / 2) as isize + i as isize;
            let sample = if sample_idx >= 0 && (sample_idx as usize) < y.len() {
                y[sample_idx as usize]
            } else {
                0.0
            };
            let w = 0.5 * (1.0 - (2.0 * PI * i as f32 / (n_fft - 1) as f32).cos());
            *buf = Complex32::new(sample * w, 0.0);
        }

        fft.forward(&mut buffer);

        // Interpolate FFT bins onto the log-spaced CQT bins
        for (bin_idx, &freq) in freqs.iter().enumerate() {
            let fft_bin = freq * n_fft as f32 / sr as f32;
            let bin_low = fft_bin.floor() as usize;
            let bin_high = (bin_low + 1).min(n_fft / 2);
            let frac = fft_bin - bin_low as f32;

            let val = if bin_low < n_fft / 2 {
                let v_low = buffer[bin_low];
                let v_high = buffer[bin_high];
                Complex32::new(
                    v_low.re * (1.0 - frac) + v_high.re * frac,
                    v_low.im * (1.0 - frac) + v_high.im * frac,
                )
            } else {
                Complex32::new(0.0, 0.0)
            };

            let scale = (n_fft as f32 / lengths[bin_idx] as f32).sqrt();
            gram[(bin_idx, frame_idx)] = val.norm() * scale;
        }
    }

    Ok(gram)
}

/// Convert an amplitude spectrogram to dB scale referenced to its maximum.
/// S_db = 20 * log10(max(S, amin)) - 20 * log10(max(ref, amin)), clipped to
/// `top_db` below the peak when given.
pub fn amplitude_to_db(amplitude: &Array2<f32>, amin: f32, top_db: Option<f32>) -> Array2<f32> {
    let ref_amplitude = amplitude.iter().copied().fold(0.0f32, f32::max);
    let log_ref = 20.0 * ref_amplitude.max(amin).log10();

    let mut db = amplitude.mapv(|a| 20.0 * a.max(amin).log10() - log_ref);

    if let Some(top) = top_db {
        let max_db = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let threshold = max_db - top;
        db.mapv_inplace(|v| v.max(threshold));
    }

    db
}

// ============================================================================
// TESTS
// ============================================================================
