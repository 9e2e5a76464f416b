use anyhow::{bail, Context, Result};
use clap::Parser;
use midi_align_extract::archive::save_gram;
use midi_align_extract::features::{audio_cqt, midi_cqt, AUDIO_FS};
use midi_align_extract::models::BatchOutcome;
use midi_align_extract::progress::{create_progress_bar, set_log_only};
use midi_align_extract::score::MidiScore;
use midi_align_extract::synth::load_wav_mono;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "extract-features")]
#[command(about = "Compute log-CQT spectrogram archives for MIDI and WAV files")]
struct Args {
    /// Folder to scan recursively for .mid, .midi, and .wav files
    input: PathBuf,

    /// Worker threads (0 = rayon default)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Recompute archives that already exist
    #[arg(long)]
    force: bool,

    /// Hide progress bars for tail-friendly logs
    #[arg(long)]
    log_only: bool,
}

fn is_supported(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("mid")
            || ext.eq_ignore_ascii_case("midi")
            || ext.eq_ignore_ascii_case("wav")
    )
}

/// Output archive path: the input filename with `.npz` in place of its
/// extension, next to the input.
fn output_path(input: &Path) -> PathBuf {
    input.with_extension("npz")
}

fn extract_one(input: &Path) -> Result<()> {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let gram = match ext.as_str() {
        "mid" | "midi" => {
            let score = MidiScore::from_path(input)?;
            midi_cqt(&score)?
        }
        "wav" => {
            let audio = load_wav_mono(input, AUDIO_FS)?;
            audio_cqt(&audio, AUDIO_FS)?
        }
        _ => bail!("unsupported file type {}", input.display()),
    };
    save_gram(output_path(input), &gram)
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();

    if !args.input.is_dir() {
        bail!("input folder {} does not exist", args.input.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(&args.input)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported(path))
        .filter(|path| args.force || !output_path(path).exists())
        .collect();
    files.sort();
    println!("Found {} files to process", files.len());

    let pb = create_progress_bar(files.len() as u64, "Extracting features");
    let results: Vec<(PathBuf, Result<()>)> = files
        .into_par_iter()
        .map(|path| {
            let result = extract_one(&path);
            pb.inc(1);
            (path, result)
        })
        .collect();
    let outcome = BatchOutcome::collect(results);
    pb.finish_with_message(format!(
        "Extracted {} archives ({} failed)",
        outcome.rows.len(),
        outcome.failures.len()
    ));
    outcome.report_failures();

    println!("\n{:=<60}", "");
    println!("Extraction complete!");
    println!("  Archives: {}", outcome.rows.len());
    println!("  Failures: {}", outcome.failures.len());
    println!("  Elapsed: {:.2}s", start.elapsed().as_secs_f64());
    println!("{:=<60}", "");

    if outcome.rows.is_empty() && !outcome.failures.is_empty() {
        bail!("every input file failed");
    }
    Ok(())
}
