use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::browser::{js_str, BrowserSession};
use crate::config::FetchSettings;
use crate::discover::{DocumentRef, Locator};
use crate::error::{IngestError, IngestResult};
use crate::pacing::Pacer;

/// A downloaded checklist on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedDocument {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Flat directory of downloaded documents, one file per filename.
///
/// Anything at or below `threshold` bytes is an incomplete download.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    dir: PathBuf,
    threshold: u64,
}

impl DocumentCache {
    pub fn new(dir: impl Into<PathBuf>, threshold: u64) -> Self {
        DocumentCache {
            dir: dir.into(),
            threshold,
        }
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// A trusted cache entry, if any. Undersized files are deleted on sight.
    pub fn lookup(&self, filename: &str) -> IngestResult<Option<CachedDocument>> {
        let path = self.path_for(filename);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if size > self.threshold {
            return Ok(Some(CachedDocument {
                filename: filename.to_string(),
                path,
                size_bytes: size,
            }));
        }
        warn!("Discarding corrupt cache entry {} ({} bytes)", filename, size);
        fs::remove_file(&path)?;
        Ok(None)
    }

    /// Size-check a document before it is read. Undersized entries of this
    /// cache are deleted; files elsewhere are only rejected.
    pub fn validate(&self, path: &Path) -> IngestResult<CachedDocument> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let size = fs::metadata(path)?.len();
        if size <= self.threshold {
            if path.parent() == Some(self.dir.as_path()) {
                warn!("Discarding corrupt cache entry {} ({} bytes)", filename, size);
                fs::remove_file(path)?;
            }
            return Err(IngestError::FetchValidation {
                filename,
                size,
                threshold: self.threshold,
            });
        }
        Ok(CachedDocument {
            filename,
            path: path.to_path_buf(),
            size_bytes: size,
        })
    }

    /// Write `bytes` and re-check the size on disk. A failed check leaves no file behind.
    pub fn store(&self, filename: &str, bytes: &[u8]) -> IngestResult<CachedDocument> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(filename);
        fs::write(&path, bytes)?;
        let size = fs::metadata(&path)?.len();
        if size <= self.threshold {
            fs::remove_file(&path)?;
            return Err(IngestError::FetchValidation {
                filename: filename.to_string(),
                size,
                threshold: self.threshold,
            });
        }
        Ok(CachedDocument {
            filename: filename.to_string(),
            path,
            size_bytes: size,
        })
    }

    /// Cached files ending in `extension`, sorted by name.
    pub fn list(&self, extension: &str) -> IngestResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let ext = extension.to_lowercase();
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.to_lowercase().ends_with(&ext));
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Last path segment of `url`, without query or fragment.
pub fn filename_from_url(url: &str) -> IngestResult<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        return Err(IngestError::InvalidDocumentUrl(url.to_string()));
    }
    Ok(name.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub document: CachedDocument,
    pub from_cache: bool,
    pub attempts: u32,
}

/// Downloads documents one at a time through the browser session.
pub struct Fetcher<'a, B: ?Sized> {
    browser: &'a B,
    pacer: &'a Pacer,
    cache: DocumentCache,
    settings: FetchSettings,
}

impl<'a, B> Fetcher<'a, B>
where
    B: BrowserSession + ?Sized,
{
    pub fn new(browser: &'a B, pacer: &'a Pacer, settings: FetchSettings) -> Self {
        let cache = DocumentCache::new(&settings.cache_dir, settings.corruption_threshold);
        Fetcher {
            browser,
            pacer,
            cache,
            settings,
        }
    }

    /// Return the cached copy of `doc`, downloading it if needed.
    ///
    /// 429 responses back off exponentially; other failures wait one pacing
    /// delay. Either way the attempt count is capped by the pacer.
    pub async fn fetch(&self, doc: &DocumentRef) -> IngestResult<FetchOutcome> {
        let filename = filename_from_url(&doc.url)?;
        if let Some(document) = self.cache.lookup(&filename)? {
            info!("Already downloaded: {}", filename);
            return Ok(FetchOutcome {
                document,
                from_cache: true,
                attempts: 0,
            });
        }

        let max = self.pacer.max_retries();
        let mut attempt = 0;
        let mut last_error = String::from("no attempts made");
        while attempt < max {
            match self.download(doc, &filename).await {
                Ok(document) => {
                    info!(
                        "Downloaded: {} ({}KB)",
                        filename,
                        document.size_bytes / 1024
                    );
                    self.pacer.pause().await;
                    return Ok(FetchOutcome {
                        document,
                        from_cache: false,
                        attempts: attempt + 1,
                    });
                }
                Err(e) if e.is_rate_limit() => {
                    warn!(
                        "Rate limited on {} (attempt {}/{})",
                        filename,
                        attempt + 1,
                        max
                    );
                    last_error = e.to_string();
                    let waited = self.pacer.back_off(attempt).await?;
                    debug!("Backed off {:.1}s", waited.as_secs_f64());
                }
                Err(e) => {
                    warn!(
                        "Error downloading {} (attempt {}/{}): {}",
                        filename,
                        attempt + 1,
                        max,
                        e
                    );
                    last_error = e.to_string();
                    self.pacer.pause().await;
                }
            }
            attempt += 1;
        }

        Err(IngestError::RetriesExhausted {
            attempts: attempt,
            last_error,
        })
    }

    async fn download(&self, doc: &DocumentRef, filename: &str) -> IngestResult<CachedDocument> {
        self.scroll_into_view(&doc.locator).await;
        if !self.settings.scroll_settle.is_zero() {
            tokio::time::sleep(self.settings.scroll_settle).await;
        }

        let response = self.browser.fetch_binary(&doc.url).await?;
        if response.is_rate_limited() {
            return Err(IngestError::RateLimited {
                status: response.status,
            });
        }
        if !response.is_ok() {
            let reason = match &response.error {
                Some(err) => err.clone(),
                None => format!("HTTP error! status: {}", response.status),
            };
            return Err(IngestError::Browser(reason));
        }

        let bytes = response.decode_body()?;
        self.cache.store(filename, &bytes)
    }

    async fn scroll_into_view(&self, locator: &Locator) {
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll({sel})[{idx}];
                if (!el) return false;
                el.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
                return true;
            }})()"#,
            sel = js_str(&locator.selector),
            idx = locator.index
        );
        if let Err(e) = self.browser.evaluate(&script).await {
            debug!("Could not scroll to {}: {}", locator, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::link_selector;
    use crate::testing::{fast_pacer, pdf_response, status_response, FakeBrowser};
    use std::time::Duration;

    fn doc(url: &str) -> DocumentRef {
        DocumentRef {
            url: url.to_string(),
            title: "Checklist".into(),
            locator: Locator {
                selector: link_selector(".pdf"),
                index: 0,
            },
        }
    }

    fn settings(dir: &Path) -> FetchSettings {
        FetchSettings {
            cache_dir: dir.to_path_buf(),
            corruption_threshold: 1000,
            scroll_settle: Duration::ZERO,
        }
    }

    #[test]
    fn filename_is_last_segment() {
        assert_eq!(
            filename_from_url("https://cdn.test/files/2021-Topps-Chrome.pdf?v=3").unwrap(),
            "2021-Topps-Chrome.pdf"
        );
        assert!(filename_from_url("https://cdn.test/files/").is_err());
    }

    #[tokio::test]
    async fn valid_cache_entry_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("set.pdf"), vec![0u8; 2000]).unwrap();
        let browser = FakeBrowser::new();
        let pacer = fast_pacer(3);
        let fetcher = Fetcher::new(&browser, &pacer, settings(dir.path()));

        let first = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap();
        let second = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap();
        assert!(first.from_cache && second.from_cache);
        assert_eq!(second.document.size_bytes, 2000);
        assert_eq!(browser.fetch_count(), 0);
    }

    #[tokio::test]
    async fn download_then_second_call_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let browser = FakeBrowser::new().with_responses(vec![pdf_response(4096)]);
        let pacer = fast_pacer(3);
        let fetcher = Fetcher::new(&browser, &pacer, settings(dir.path()));

        let first = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.attempts, 1);
        let second = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(browser.fetch_count(), 1);
    }

    #[tokio::test]
    async fn undersized_cache_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("set.pdf"), vec![0u8; 500]).unwrap();
        let browser = FakeBrowser::new().with_responses(vec![pdf_response(3000)]);
        let pacer = fast_pacer(3);
        let fetcher = Fetcher::new(&browser, &pacer, settings(dir.path()));

        let out = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap();
        assert!(!out.from_cache);
        assert_eq!(browser.fetch_count(), 1);
        assert_eq!(fs::metadata(dir.path().join("set.pdf")).unwrap().len(), 3000);
    }

    #[tokio::test]
    async fn undersized_download_is_deleted_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let browser =
            FakeBrowser::new().with_responses(vec![pdf_response(200), pdf_response(1500)]);
        let pacer = fast_pacer(3);
        let fetcher = Fetcher::new(&browser, &pacer, settings(dir.path()));

        let out = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap();
        assert_eq!(out.attempts, 2);
        assert_eq!(out.document.size_bytes, 1500);
    }

    #[tokio::test]
    async fn exhaustion_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let browser = FakeBrowser::new().with_responses(vec![
            status_response(500),
            pdf_response(10),
            status_response(404),
        ]);
        let pacer = fast_pacer(3);
        let fetcher = Fetcher::new(&browser, &pacer, settings(dir.path()));

        let err = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap_err();
        assert!(matches!(err, IngestError::RetriesExhausted { attempts: 3, .. }));
        assert!(!dir.path().join("set.pdf").exists());
        assert_eq!(browser.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_back_off_exponentially() {
        let dir = tempfile::tempdir().unwrap();
        let browser = FakeBrowser::new().with_responses(vec![
            status_response(429),
            status_response(429),
            status_response(429),
        ]);
        let pacer = Pacer::new(crate::config::PacingSettings {
            base_delay: Duration::ZERO,
            jitter_max: Duration::ZERO,
            backoff_base: Duration::from_millis(2500),
            backoff_multiplier: 2,
            max_retries: 3,
        });
        let fetcher = Fetcher::new(&browser, &pacer, settings(dir.path()));

        let start = tokio::time::Instant::now();
        let err = fetcher.fetch(&doc("https://x.test/set.pdf")).await.unwrap_err();
        let elapsed = start.elapsed();

        // 2500 + 5000 + 10000
        assert!(elapsed >= Duration::from_millis(17_500));
        assert!(elapsed < Duration::from_millis(17_550));
        assert!(matches!(err, IngestError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(browser.fetch_count(), 3);
    }

    #[test]
    fn list_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.pdf"), b"x").unwrap();
        fs::write(dir.path().join("a.PDF"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let cache = DocumentCache::new(dir.path(), 1000);
        let names: Vec<_> = cache
            .list(".pdf")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn validate_rejects_and_removes_small_cache_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path(), 1000);
        fs::write(dir.path().join("small.pdf"), vec![0u8; 1000]).unwrap();
        fs::write(dir.path().join("good.pdf"), vec![0u8; 1001]).unwrap();

        let err = cache.validate(&dir.path().join("small.pdf")).unwrap_err();
        assert!(matches!(err, IngestError::FetchValidation { size: 1000, .. }));
        assert!(!dir.path().join("small.pdf").exists());

        let ok = cache.validate(&dir.path().join("good.pdf")).unwrap();
        assert_eq!(ok.filename, "good.pdf");
        assert_eq!(ok.size_bytes, 1001);
    }

    #[test]
    fn validate_leaves_outside_files_alone() {
        let cache_dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let path = other.path().join("manual.pdf");
        fs::write(&path, b"tiny").unwrap();
        let cache = DocumentCache::new(cache_dir.path(), 1000);
        assert!(cache.validate(&path).is_err());
        assert!(path.exists());
    }
}
