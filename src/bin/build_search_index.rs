use anyhow::{Context, Result};
use clap::Parser;
use midi_align_extract::catalog::{DatasetLookup, DEFAULT_DATASETS};
use midi_align_extract::models::IndexRecord;
use midi_align_extract::progress::{create_spinner, set_log_only};
use midi_align_extract::search::{create_index, Searcher};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "build-search-index")]
#[command(about = "Build the accent-insensitive artist/title search index")]
struct Args {
    /// Base data folder holding the dataset index files
    data: PathBuf,

    /// Index output folder (default: <data>/search_index)
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Audio datasets to index, comma-separated
    #[arg(long)]
    datasets: Option<String>,

    /// Run a test query after building, formatted "artist|title"
    #[arg(long)]
    test: Option<String>,

    /// Score threshold for the test query
    #[arg(long, default_value = "20")]
    threshold: i64,

    /// Hide progress bars for tail-friendly logs
    #[arg(long)]
    log_only: bool,
}

/// Flatten the audio catalogs into index records. Each record is keyed by
/// `{dataset}_{row}` so hits map straight back to catalog entries.
fn collect_records(lookup: &DatasetLookup, datasets: &[String]) -> Result<Vec<IndexRecord>> {
    let mut records = Vec::new();
    for dataset in datasets {
        for (row, entry) in lookup.dataset(dataset)?.iter().enumerate() {
            let id = format!("{dataset}_{row}");
            let path = entry
                .path
                .clone()
                .unwrap_or_else(|| format!("{dataset}/{row}"));
            records.push(IndexRecord {
                id,
                path,
                artist: entry.artist.clone(),
                title: entry.title.clone(),
            });
        }
    }
    Ok(records)
}

fn test_search(searcher: &Searcher, query: &str, threshold: i64) -> Result<()> {
    let (artist, title) = query
        .split_once('|')
        .context("test query must be formatted \"artist|title\"")?;

    println!("\nSearch results for '{artist}' / '{title}':");
    println!("{:-<80}", "");
    let hits = searcher.search(artist, title, threshold)?;
    for hit in &hits {
        println!("[{}] {} - {} score={}", hit.id, hit.artist, hit.title, hit.score);
    }
    if hits.is_empty() {
        println!("No results found.");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    let start = Instant::now();

    let datasets: Vec<String> = match &args.datasets {
        Some(list) => list.split(',').map(|d| d.trim().to_string()).collect(),
        None => DEFAULT_DATASETS.iter().map(|d| d.to_string()).collect(),
    };
    println!("Loading dataset indices from {:?}", args.data);
    let lookup = DatasetLookup::load(&args.data, &datasets)?;
    let records = collect_records(&lookup, &datasets)?;

    let index_dir = args
        .index_dir
        .unwrap_or_else(|| args.data.join("search_index"));
    let spinner = create_spinner("Building search index");
    let db_path = create_index(&index_dir, &records)?;
    spinner.finish_with_message(format!("Indexed {} records", records.len()));

    let file_size = std::fs::metadata(&db_path)?.len();
    println!("\n{:=<60}", "");
    println!("Index complete!");
    println!("  Records: {}", records.len());
    println!("  Output size: {:.2} MB", file_size as f64 / 1_048_576.0);
    println!("  Elapsed: {:.2}s", start.elapsed().as_secs_f64());
    println!("{:=<60}", "");

    if let Some(query) = args.test {
        let searcher = Searcher::open(&index_dir)?;
        test_search(&searcher, &query, args.threshold)?;
    }
    Ok(())
}
