//! Lists the entries of an RPA archive.
//!
//! Prints one line per entry with its size; `--kinds` adds the preview
//! classification column.
use clap::Parser;
use rpa::{RpaArchive, preview};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "list_rpa")]
struct Cli {
    /// Archive to list.
    pub archive: PathBuf,

    /// Show the preview kind of each entry.
    #[clap(long)]
    pub kinds: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let archive = RpaArchive::load(&args.archive)?;
    if let Some(version) = archive.version() {
        println!(
            "RPA {version}, {} entries, step {:#x}",
            archive.len(),
            archive.step()
        );
    }

    for (path, source) in archive.entries() {
        let size = source.total_length().unwrap_or(0);

        if args.kinds {
            let kind = preview::classify(path);
            println!("{size:>10}  {kind:<8} {path}");
        } else {
            println!("{size:>10}  {path}");
        }
    }

    Ok(())
}
