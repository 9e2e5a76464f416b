//! Command-line fluidsynth synthesis.
//!
//! Renders a MIDI score to audio by shelling out to the `fluidsynth`
//! binary, which is much faster than driving the synth through bindings.
//! Both the temporary `.mid` and `.wav` live in [`tempfile::NamedTempFile`]
//! guards, so they are removed on every exit path.

use crate::score::MidiScore;
use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Environment override for the soundfont path.
pub const SF2_ENV: &str = "MIDI_SF2_PATH";

/// Soundfont shipped with most fluidsynth installs.
const DEFAULT_SF2: &str = "/usr/share/sounds/sf2/TimGM6mb.sf2";

/// Resolve the soundfont: `$MIDI_SF2_PATH` when set, else the system default.
pub fn default_soundfont() -> PathBuf {
    soundfont_path(env::var_os(SF2_ENV))
}

fn soundfont_path(env_override: Option<OsString>) -> PathBuf {
    env_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SF2))
}

/// Synthesize a score at sample rate `fs` using the command-line program.
///
/// Fluidsynth occasionally pads a lot of silence on the end, so the rendered
/// waveform is cropped to the score's end time before returning.
pub fn fast_fluidsynth(score: &MidiScore, fs: u32) -> Result<Vec<f32>> {
    let sf2 = default_soundfont();
    if !sf2.exists() {
        bail!(
            "soundfont not found at {} (set {} to override)",
            sf2.display(),
            SF2_ENV
        );
    }

    let temp_mid = tempfile::Builder::new()
        .suffix(".mid")
        .tempfile()
        .context("failed to create temporary MIDI file")?;
    score.write(temp_mid.path())?;

    let temp_wav = tempfile::Builder::new()
        .suffix(".wav")
        .tempfile()
        .context("failed to create temporary WAV file")?;

    let status = Command::new("fluidsynth")
        .arg("-ni")
        .arg("-F")
        .arg(temp_wav.path())
        .arg("-r")
        .arg(fs.to_string())
        .arg(&sf2)
        .arg(temp_mid.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run fluidsynth (is it installed?)")?;
    if !status.success() {
        bail!("fluidsynth exited with {status}");
    }

    let audio = load_wav_mono(temp_wav.path(), fs)?;
    Ok(crop_to_duration(audio, score.end_time(), fs))
}

/// Load a WAV file as mono f32 samples, checking the sample rate is the
/// expected one. There is no resampler in the pipeline; audio must already
/// be at the rate the spectrogram parameters assume.
pub fn load_wav_mono(path: &Path, expected_fs: u32) -> Result<Vec<f32>> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open rendered WAV {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != expected_fs {
        bail!(
            "rendered WAV has sample rate {} but {} was requested",
            spec.sample_rate,
            expected_fs
        );
    }

    let channels = spec.channels as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("failed to read WAV samples")?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .context("failed to read WAV samples")?
        }
    };

    if channels <= 1 {
        return Ok(interleaved);
    }
    // Average the channels down to mono
    Ok(interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Crop trailing samples so the waveform covers exactly `duration` seconds
/// (floor of `duration * fs` samples, capped at the input length).
pub fn crop_to_duration(mut samples: Vec<f32>, duration: f64, fs: u32) -> Vec<f32> {
    let keep = (duration * fs as f64) as usize;
    samples.truncate(keep);
    samples
}

// ============================================================================
// TESTS
// ============================================================================
