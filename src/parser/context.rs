use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_\s]+").unwrap());

/// Per-document metadata shared by every card in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionContext {
    pub detected_year: Option<i32>,
    pub set_name: String,
}

/// First 1900–2099 token in `s`.
pub fn find_year(s: &str) -> Option<i32> {
    YEAR_RE.find(s).and_then(|m| m.as_str().parse().ok())
}

impl ExtractionContext {
    /// Year from the filename, else from the text; set name from the filename.
    pub fn from_document(filename: &str, text: &str) -> Self {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);

        let detected_year = find_year(stem).or_else(|| find_year(text));

        let without_year = YEAR_RE.replace(stem, "");
        let set_name = SEPARATOR_RE
            .replace_all(&without_year, " ")
            .trim()
            .to_string();

        ExtractionContext {
            detected_year,
            set_name,
        }
    }

    /// Apply command-line overrides before any card is built.
    pub fn with_overrides(mut self, year: Option<i32>, set_name: Option<&str>) -> Self {
        if let Some(y) = year {
            self.detected_year = Some(y);
        }
        if let Some(s) = set_name {
            self.set_name = s.to_string();
        }
        self
    }
}
