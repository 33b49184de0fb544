use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::config::Settings;
use crate::db::{CardFilter, CardStore, FieldCount};
use crate::dedup::{Deduplicator, Keyed};
use crate::discover::discover_documents;
use crate::error::{IngestError, IngestResult};
use crate::extract::TextDecoder;
use crate::fetcher::{DocumentCache, Fetcher};
use crate::pacing::Pacer;
use crate::parser::context::ExtractionContext;
use crate::parser::{parse_text, CardCandidate};
use crate::publish::{BatchPublisher, PublishReport};

const PREVIEW_ROWS: usize = 5;

/// Set from the Ctrl-C handler, checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub name: String,
    pub error: String,
}

// ── discover-and-fetch ──

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub started_at: DateTime<Utc>,
    pub discovered: usize,
    pub downloaded: usize,
    pub cached: usize,
    pub bytes_downloaded: u64,
    /// Attempts beyond the first, over all downloaded documents.
    pub retries: u32,
    pub failed: Vec<FailedItem>,
    pub cancelled: bool,
}

impl ScrapeSummary {
    pub fn succeeded(&self) -> usize {
        self.downloaded + self.cached
    }
}

/// Find checklist links and download each one, strictly one after another.
///
/// Only a failed navigation to the listing page aborts; a document that
/// cannot be fetched is recorded and skipped.
pub async fn discover_and_fetch<B>(
    browser: &B,
    settings: &Settings,
    limit: Option<usize>,
    cancel: &CancelFlag,
) -> IngestResult<ScrapeSummary>
where
    B: BrowserSession + ?Sized,
{
    let started_at = Utc::now();
    let pacer = Pacer::new(settings.pacing());
    let docs = discover_documents(browser, &pacer, &settings.discovery(), limit).await?;
    let fetcher = Fetcher::new(browser, &pacer, settings.fetch());

    let mut summary = ScrapeSummary {
        started_at,
        discovered: docs.len(),
        downloaded: 0,
        cached: 0,
        bytes_downloaded: 0,
        retries: 0,
        failed: Vec::new(),
        cancelled: false,
    };

    let pb = progress_bar(docs.len());
    for doc in &docs {
        if cancel.is_cancelled() {
            warn!("Cancelled, {} documents left", docs.len() - pb.position() as usize);
            summary.cancelled = true;
            break;
        }
        pb.set_message(doc.title.clone());
        match fetcher.fetch(doc).await {
            Ok(out) if out.from_cache => summary.cached += 1,
            Ok(out) => {
                summary.downloaded += 1;
                summary.bytes_downloaded += out.document.size_bytes;
                summary.retries += out.attempts.saturating_sub(1);
            }
            Err(e) => {
                warn!("Failed to download {}: {}", doc.url, e);
                summary.failed.push(FailedItem {
                    name: doc.url.clone(),
                    error: e.to_string(),
                });
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Fetched {} documents ({} downloaded, {} cached, {} failed)",
        summary.discovered,
        summary.downloaded,
        summary.cached,
        summary.failed.len()
    );
    Ok(summary)
}

// ── extract ──

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub file: Option<PathBuf>,
    pub preview: bool,
    pub year: Option<i32>,
    pub set_name: Option<String>,
    pub limit: Option<usize>,
    /// Keep every parsed card in the summary, for export.
    pub keep_cards: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub filename: String,
    pub year: Option<i32>,
    pub set_name: String,
    pub page_count: Option<usize>,
    pub lines: usize,
    pub unmatched: usize,
    pub rejected: usize,
    pub candidates: usize,
    pub unique: usize,
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<CardCandidate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractSummary {
    pub documents: Vec<DocumentReport>,
    pub failed: Vec<FailedItem>,
    pub candidates: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub publish: PublishReport,
    pub preview: bool,
    pub cancelled: bool,
    #[serde(skip)]
    pub cards: Vec<CardCandidate>,
}

impl ExtractSummary {
    pub fn inserted(&self) -> usize {
        self.publish.affected()
    }
}

fn resolve_file(cache: &DocumentCache, file: &Path) -> PathBuf {
    if file.is_absolute() || file.exists() {
        file.to_path_buf()
    } else {
        cache.path_for(&file.to_string_lossy())
    }
}

/// Parse cached documents into cards and, unless previewing, store the new ones.
///
/// Cards already in `store` (or seen earlier in this run) are counted as
/// duplicates and never inserted.
pub fn extract(
    settings: &Settings,
    decoder: &dyn TextDecoder,
    mut store: Option<&mut dyn CardStore>,
    opts: &ExtractOptions,
    cancel: &CancelFlag,
) -> Result<ExtractSummary> {
    let cache = DocumentCache::new(&settings.cache_dir, settings.corruption_threshold);
    let mut files = match &opts.file {
        Some(f) => vec![resolve_file(&cache, f)],
        None => cache.list(&settings.document_extension)?,
    };
    if let Some(n) = opts.limit {
        files.truncate(n);
    }

    let mut dedup = match store.as_deref() {
        Some(s) => {
            let existing = s.query_cards(&CardFilter::default())?;
            let dedup = Deduplicator::with_existing(existing.iter().map(|c| c.dedup_key()));
            info!("Loaded {} stored card keys", dedup.seen());
            dedup
        }
        None => Deduplicator::new(),
    };
    let publisher = BatchPublisher::new(settings.batch_size);

    let mut summary = ExtractSummary {
        preview: opts.preview,
        ..Default::default()
    };

    let pb = progress_bar(files.len());
    for path in &files {
        if cancel.is_cancelled() {
            warn!("Cancelled before {}", path.display());
            summary.cancelled = true;
            break;
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        pb.set_message(filename.clone());

        let decoded = cache
            .validate(path)
            .and_then(|doc| std::fs::read(&doc.path).map_err(IngestError::from))
            .and_then(|bytes| decoder.decode(&filename, &bytes));
        let decoded = match decoded {
            Ok(d) => d,
            Err(e) => {
                warn!("Skipping {}: {}", filename, e);
                summary.failed.push(FailedItem {
                    name: filename,
                    error: e.to_string(),
                });
                pb.inc(1);
                continue;
            }
        };

        let ctx = ExtractionContext::from_document(&filename, &decoded.text)
            .with_overrides(opts.year, opts.set_name.as_deref());
        let parsed = parse_text(&decoded.text, &ctx, &settings.brand);
        let candidates = parsed.candidates.len();
        let preview = if opts.preview {
            parsed.candidates.iter().take(PREVIEW_ROWS).cloned().collect()
        } else {
            Vec::new()
        };
        if opts.keep_cards {
            summary.cards.extend(parsed.candidates.iter().cloned());
        }
        let partition = dedup.partition(parsed.candidates);

        if let Some(s) = store.as_deref_mut() {
            if !opts.preview && !partition.unique.is_empty() {
                summary.publish.extend(publisher.insert(s, &partition.unique));
            }
        }

        info!(
            "Processed {}: {} cards extracted ({} new)",
            filename,
            candidates,
            partition.unique.len()
        );
        summary.candidates += candidates;
        summary.unique += partition.unique.len();
        summary.duplicates += partition.duplicates.len();
        summary.documents.push(DocumentReport {
            filename,
            year: ctx.detected_year,
            set_name: ctx.set_name,
            page_count: decoded.page_count,
            lines: parsed.lines,
            unmatched: parsed.unmatched,
            rejected: parsed.rejected,
            candidates,
            unique: partition.unique.len(),
            duplicates: partition.duplicates.len(),
            preview,
        });
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(summary)
}

// ── export ──

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub output: PathBuf,
    pub documents: usize,
    pub failed: Vec<FailedItem>,
    pub cards: usize,
    pub sets: Vec<String>,
    pub by_sport: Vec<FieldCount>,
    #[serde(skip)]
    pub sample: Vec<CardCandidate>,
    pub cancelled: bool,
}

/// Extract without touching the database and write every parsed card to CSV.
pub fn export_csv(
    settings: &Settings,
    decoder: &dyn TextDecoder,
    opts: &ExtractOptions,
    output: &Path,
    cancel: &CancelFlag,
) -> Result<ExportSummary> {
    let opts = ExtractOptions {
        preview: false,
        keep_cards: true,
        ..opts.clone()
    };
    let extracted = extract(settings, decoder, None, &opts, cancel)?;
    write_csv(output, &extracted.cards)?;
    info!("Wrote {} cards to {}", extracted.cards.len(), output.display());

    let sets: BTreeSet<&str> = extracted.cards.iter().map(|c| c.set_name.as_str()).collect();
    let mut sport_counts: HashMap<&str, usize> = HashMap::new();
    for c in &extracted.cards {
        *sport_counts.entry(c.sport.as_str()).or_default() += 1;
    }
    let mut by_sport: Vec<FieldCount> = sport_counts
        .into_iter()
        .map(|(sport, count)| FieldCount {
            value: Some(sport.to_string()),
            count,
        })
        .collect();
    by_sport.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));

    Ok(ExportSummary {
        output: output.to_path_buf(),
        documents: extracted.documents.len(),
        failed: extracted.failed,
        cards: extracted.cards.len(),
        sets: sets.into_iter().map(String::from).collect(),
        by_sport,
        sample: extracted.cards.iter().take(PREVIEW_ROWS).cloned().collect(),
        cancelled: extracted.cancelled,
    })
}

pub fn write_csv(path: &Path, cards: &[CardCandidate]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    for card in cards {
        wtr.serialize(card)?;
    }
    wtr.flush()?;
    Ok(())
}

// ── deduplicate ──

#[derive(Debug, Clone, Serialize)]
pub struct CleanSummary {
    pub scanned: usize,
    pub duplicates: usize,
    pub publish: PublishReport,
}

/// Delete stored cards whose key already appeared on a lower id.
pub fn deduplicate(
    store: &mut dyn CardStore,
    filter: &CardFilter,
    delete_batch_size: usize,
) -> Result<CleanSummary> {
    let cards = store.query_cards(filter)?;
    let scanned = cards.len();
    let partition = Deduplicator::new().partition(cards);
    let ids: Vec<i64> = partition.duplicates.iter().map(|d| d.item.id).collect();
    info!("Found {} duplicate cards among {}", ids.len(), scanned);

    let publish = BatchPublisher::new(delete_batch_size).delete(store, &ids);
    Ok(CleanSummary {
        scanned,
        duplicates: ids.len(),
        publish,
    })
}
