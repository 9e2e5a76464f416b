use anyhow::{bail, Context, Result};
use clap::Parser;
use midi_align_extract::catalog::{DatasetLookup, DEFAULT_DATASETS};
use midi_align_extract::progress::set_log_only;
use midi_align_extract::report::{build_report, write_tsv};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "create-alignment-tsv")]
#[command(about = "Build a TSV of alignment-quality scores from cached diagnostics")]
struct Args {
    /// Base data folder holding the dataset index files
    data: PathBuf,

    /// Alignment results folder under the data folder
    #[arg(long, default_value = "clean_midi_aligned")]
    alignment_folder: String,

    /// Audio datasets to resolve, comma-separated
    #[arg(long)]
    datasets: Option<String>,

    /// Worker threads (0 = rayon default)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Output TSV path (default: <alignment folder>/results.tsv)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Hide progress bars for tail-friendly logs
    #[arg(long)]
    log_only: bool,
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

    let datasets: Vec<String> = match &args.datasets {
        Some(list) => list.split(',').map(|d| d.trim().to_string()).collect(),
        None => DEFAULT_DATASETS.iter().map(|d| d.to_string()).collect(),
    };
    println!("Loading dataset indices from {:?}", args.data);
    let lookup = DatasetLookup::load(&args.data, &datasets)?;

    let diagnostics_dir = args.data.join(&args.alignment_folder).join("npz");
    let outcome = build_report(&diagnostics_dir, &lookup)?;
    outcome.report_failures();

    let output = args
        .output
        .unwrap_or_else(|| args.data.join(&args.alignment_folder).join("results.tsv"));
    write_tsv(&output, &outcome.rows)?;

    println!("\n{:=<60}", "");
    println!("Report complete!");
    println!("  Rows: {}", outcome.rows.len());
    println!("  Failures: {}", outcome.failures.len());
    println!("  Output: {}", output.display());
    println!("  Elapsed: {:.2}s", start.elapsed().as_secs_f64());
    println!("{:=<60}", "");

    if outcome.rows.is_empty() && !outcome.failures.is_empty() {
        bail!("every diagnostics file failed");
    }
    Ok(())
}
