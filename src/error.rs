use thiserror::Error;

/// Failures surfaced by the ingestion pipeline.
///
/// Only [`IngestError::Navigation`] is fatal to a whole run. Everything else is
/// scoped to one document or one persistence chunk and ends up in a summary.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("consent banner handling failed: {0}")]
    ConsentInterstitial(String),

    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("fetched artifact {filename} is {size} bytes (threshold {threshold})")]
    FetchValidation {
        filename: String,
        size: u64,
        threshold: u64,
    },

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("text extraction failed for {filename}: {reason}")]
    ExtractionFailed { filename: String, reason: String },

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("browser session error: {0}")]
    Browser(String),

    #[error("cannot derive a filename from {0}")]
    InvalidDocumentUrl(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, IngestError::RateLimited { .. })
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        IngestError::Persistence(e.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
