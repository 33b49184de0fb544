mod browser;
mod config;
mod db;
mod dedup;
mod discover;
mod error;
mod extract;
mod fetcher;
mod pacing;
mod parser;
mod pipeline;
mod publish;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use browser::ChromeSession;
use config::Settings;
use db::{CardFilter, FieldCount, SqliteStore};
use extract::PdfDecoder;
use pipeline::{CancelFlag, ExtractOptions};

#[derive(Parser)]
#[command(name = "checklist_ingest", about = "Trading card checklist ingestion")]
struct Cli {
    /// Also print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find checklist documents on the listing page and download them
    Scrape {
        /// Max documents to download (default: all found)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract cards from downloaded checklists and store new ones
    Process {
        /// Process a single file (name in the cache dir, or a path)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Show what would be extracted without writing to the database
        #[arg(long)]
        preview: bool,
        /// Force the year for every card
        #[arg(short, long)]
        year: Option<i32>,
        /// Force the set name for every card
        #[arg(short, long)]
        set: Option<String>,
        /// Max files to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract cards into a CSV file without touching the database
    Export {
        /// Output CSV file
        #[arg(short, long, default_value = "preview-output.csv")]
        output: PathBuf,
        /// Export a single file (name in the cache dir, or a path)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Force the year for every card
        #[arg(short, long)]
        year: Option<i32>,
        /// Force the set name for every card
        #[arg(short, long)]
        set: Option<String>,
        /// Max files to read
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Remove duplicate cards from the database
    Clean {
        /// Only cards from this set
        #[arg(short, long)]
        set: Option<String>,
        /// Only cards from this year
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let cancel = CancelFlag::default();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current document");
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Commands::Scrape { limit } => {
            let session = ChromeSession::launch(&settings.browser()).await?;
            let run = pipeline::discover_and_fetch(&session, &settings, limit, &cancel).await;
            session.close().await;
            let summary = run?;

            println!(
                "Found {} documents: {} downloaded, {} already cached, {} failed.",
                summary.discovered,
                summary.downloaded,
                summary.cached,
                summary.failed.len()
            );
            if summary.downloaded > 0 {
                println!(
                    "Downloaded {}KB with {} retries.",
                    summary.bytes_downloaded / 1024,
                    summary.retries
                );
            }
            print_failures(&summary.failed);
            print_json(cli.json, &summary)
        }
        Commands::Process {
            file,
            preview,
            year,
            set,
            limit,
        } => {
            let opts = ExtractOptions {
                file,
                preview,
                year,
                set_name: set,
                limit,
                keep_cards: false,
            };
            let mut store = if preview {
                None
            } else {
                Some(SqliteStore::connect(&settings.database_path)?)
            };
            let summary = pipeline::extract(
                &settings,
                &PdfDecoder,
                store.as_mut().map(|s| s as &mut dyn db::CardStore),
                &opts,
                &cancel,
            )?;

            if summary.documents.is_empty() && summary.failed.is_empty() {
                println!(
                    "No documents found in {}. Run 'scrape' first.",
                    settings.cache_dir.display()
                );
                return Ok(());
            }
            if preview {
                for doc in &summary.documents {
                    print_preview(doc);
                }
            }
            println!(
                "Processed {} documents ({} failed): {} cards extracted, {} new, {} duplicates.",
                summary.documents.len(),
                summary.failed.len(),
                summary.candidates,
                summary.unique,
                summary.duplicates
            );
            print_failures(&summary.failed);
            if !preview {
                println!(
                    "Saved {} cards in {} batches ({} failed).",
                    summary.inserted(),
                    summary.publish.succeeded(),
                    summary.publish.failed()
                );
            }
            print_json(cli.json, &summary)
        }
        Commands::Export {
            output,
            file,
            year,
            set,
            limit,
        } => {
            let opts = ExtractOptions {
                file,
                year,
                set_name: set,
                limit,
                ..Default::default()
            };
            let summary =
                pipeline::export_csv(&settings, &PdfDecoder, &opts, &output, &cancel)?;

            println!("\nSummary:");
            println!("Total files processed: {}", summary.documents);
            println!("Total cards extracted: {}", summary.cards);
            println!("\nUnique sets found:");
            for set in &summary.sets {
                println!("  - {}", set);
            }
            print_counts("Cards by sport", &summary.by_sport);
            print_failures(&summary.failed);
            println!("\nOutput written to: {}", summary.output.display());
            if !summary.sample.is_empty() {
                println!("\nSample data (first {} cards):", summary.sample.len());
                print_card_table(&summary.sample);
            }
            print_json(cli.json, &summary)
        }
        Commands::Clean { set, year } => {
            let mut store = SqliteStore::connect(&settings.database_path)?;
            let summary = pipeline::deduplicate(
                &mut store,
                &CardFilter::scoped(set, year),
                settings.delete_batch_size,
            )?;
            if summary.duplicates == 0 {
                println!("No duplicates among {} cards.", summary.scanned);
            } else {
                println!(
                    "Removed {} of {} duplicates ({} batches ok, {} failed).",
                    summary.publish.affected(),
                    summary.duplicates,
                    summary.publish.succeeded(),
                    summary.publish.failed()
                );
            }
            print_json(cli.json, &summary)
        }
        Commands::Stats => {
            let store = SqliteStore::connect(&settings.database_path)?;
            let s = store.stats()?;
            println!("Total cards: {}", s.total);
            print_counts("By sport", &s.by_sport);
            print_counts("By year", &s.by_year);
            print_counts("Top sets", &s.top_sets);
            print_json(cli.json, &s)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_json<T: Serialize>(enabled: bool, summary: &T) -> anyhow::Result<()> {
    if enabled {
        let out = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
        println!("{}", out);
    }
    Ok(())
}

fn print_preview(doc: &pipeline::DocumentReport) {
    println!(
        "\n{} (year: {}, set: {})",
        doc.filename,
        doc.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
        doc.set_name
    );
    println!(
        "{} lines: {} cards, {} unmatched, {} rejected",
        doc.lines, doc.candidates, doc.unmatched, doc.rejected
    );
    print_card_table(&doc.preview);
    if doc.candidates > doc.preview.len() {
        println!("... and {} more", doc.candidates - doc.preview.len());
    }
}

fn print_card_table(cards: &[parser::CardCandidate]) {
    println!(
        "{:>6} | {:<28} | {:<10} | {:<3} | {:<4} | {:<5}",
        "#", "Player", "Sport", "RC", "Auto", "Patch"
    );
    println!("{}", "-".repeat(72));
    for c in cards {
        println!(
            "{:>6} | {:<28} | {:<10} | {:<3} | {:<4} | {:<5}",
            c.card_number,
            truncate(&c.player_name, 28),
            c.sport.as_str(),
            flag(c.is_rookie),
            flag(c.is_autographed),
            flag(c.is_patch)
        );
    }
}

fn print_failures(failed: &[pipeline::FailedItem]) {
    for f in failed {
        println!("  {} -- {}", f.name, truncate(&f.error, 80));
    }
}

fn print_counts(title: &str, rows: &[FieldCount]) {
    println!("\n{}:", title);
    for r in rows {
        println!(
            "  {:<32} {:>7}",
            truncate(r.value.as_deref().unwrap_or("(none)"), 32),
            r.count
        );
    }
}

fn flag(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        ""
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
