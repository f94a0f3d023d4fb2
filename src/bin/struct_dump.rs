//! Decode binary files against a text layout and print the decoded tree.
//!
//! Usage:
//!   struct_dump [--verbose] LAYOUT STRUCT FILE...
//!
//! Each file is decoded independently as one instance of STRUCT. Failures are
//! reported per file; the exit code is 1 if any file failed.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use structlayout::dump::format_record;
use structlayout::LayoutSchemas;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Layout description file.
    #[arg(value_name = "LAYOUT")]
    layout: PathBuf,
    /// Structure to decode each file as.
    #[arg(value_name = "STRUCT")]
    structure: String,
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
    /// Log schema compilation and per-field decisions.
    #[arg(long, short)]
    verbose: bool,
}

/// `--verbose` shows compilation and per-field decisions such as skipped conditional fields.
fn log_level(verbose: bool) -> Level {
    if verbose {
        Level::TRACE
    } else {
        Level::WARN
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let layouts = LayoutSchemas::load(&cli.layout)
        .map_err(|e| anyhow::anyhow!("{}: {}", cli.layout.display(), e))?;
    if layouts.schema(&cli.structure).is_none() {
        anyhow::bail!(
            "{}: no structure named {} (have: {})",
            cli.layout.display(),
            cli.structure,
            layouts.names().collect::<Vec<_>>().join(", ")
        );
    }

    let mut failures = 0;
    for path in &cli.files {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };
        match layouts.decode_with_extent(&cli.structure, &bytes) {
            Ok((record, consumed)) => {
                println!("== {} ({} of {} bytes)", path.display(), consumed, bytes.len());
                println!("{}", format_record(&record, 0));
                let trailing = bytes.len() as u64 - consumed;
                if trailing > 0 {
                    tracing::warn!(file = %path.display(), trailing, "trailing bytes after structure");
                }
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        eprintln!("{} of {} file(s) failed", failures, cli.files.len());
        process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_reaches_condition_skips() {
        assert_eq!(log_level(true), Level::TRACE);
        assert_eq!(log_level(false), Level::WARN);
    }

    #[test]
    fn parses_positional_arguments() {
        let cli = Cli::try_parse_from(["struct_dump", "-v", "a.layout", "Header", "x.bin", "y.bin"])
            .expect("parse");
        assert!(cli.verbose);
        assert_eq!(cli.structure, "Header");
        assert_eq!(cli.files.len(), 2);
        assert!(Cli::try_parse_from(["struct_dump", "a.layout", "Header"]).is_err());
    }
}
