//! Extracts entries from an RPA archive into a directory.
use clap::Parser;
use rpa::RpaArchive;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing::info;

#[derive(Parser)]
#[command(name = "unpack")]
struct Cli {
    /// Archive to extract from.
    pub archive: PathBuf,

    /// Directory to extract into.
    #[clap(long, default_value = "extracted")]
    pub output: PathBuf,

    /// Only extract entries whose path contains this substring.
    #[clap(long)]
    pub filter: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let archive = RpaArchive::load(&args.archive)?;
    info!("Loaded {} entries from {:?}", archive.len(), args.archive);

    std::fs::create_dir_all(&args.output)?;

    let selected: Vec<String> = archive
        .paths()
        .filter(|p| args.filter.as_deref().is_none_or(|f| p.contains(f)))
        .map(str::to_string)
        .collect();

    let cancel = AtomicBool::new(false);
    let report = archive.extract_batch(&selected, &args.output, &cancel);

    info!(
        "Extracted {} of {} entries to {:?}",
        report.written.len(),
        selected.len(),
        args.output
    );
    for (path, error) in &report.failures {
        eprintln!("failed {path}: {error}");
    }
    if !report.is_complete() {
        std::process::exit(1);
    }

    Ok(())
}
