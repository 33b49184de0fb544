use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "ingest";
const ENV_PREFIX: &str = "SCRAPER";

/// All tunables for a pipeline run.
///
/// Field names double as environment variable suffixes, so `SCRAPER_DELAY`
/// sets `delay` and `SCRAPER_MAX_RETRIES` sets `max_retries`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base inter-request delay in ms, also the backoff base.
    pub delay: u64,
    /// Upper bound of the random jitter added to `delay`, in ms.
    pub delay_random: u64,
    pub backoff_multiplier: u32,
    pub max_retries: u32,
    pub scroll_settle_ms: u64,

    pub listing_url: String,
    pub document_extension: String,
    pub navigation_timeout_ms: u64,
    pub consent_banner_selector: String,
    pub consent_accept_selector: String,
    pub consent_timeout_ms: u64,
    pub consent_dismiss_timeout_ms: u64,

    pub user_agent: String,
    pub referer: String,
    pub headless: bool,

    pub cache_dir: PathBuf,
    pub corruption_threshold: u64,

    pub database_path: PathBuf,
    pub brand: String,
    pub batch_size: usize,
    pub delete_batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            delay: 2500,
            delay_random: 1000,
            backoff_multiplier: 2,
            max_retries: 3,
            scroll_settle_ms: 1000,
            listing_url: "https://www.topps.com/pages/checklists".into(),
            document_extension: ".pdf".into(),
            navigation_timeout_ms: 60_000,
            consent_banner_selector: "#onetrust-banner-sdk".into(),
            consent_accept_selector: "#onetrust-accept-btn-handler".into(),
            consent_timeout_ms: 10_000,
            consent_dismiss_timeout_ms: 5_000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36"
                .into(),
            referer: "https://www.topps.com/".into(),
            headless: true,
            cache_dir: PathBuf::from("data/checklists"),
            corruption_threshold: 1000,
            database_path: PathBuf::from("data/cards.sqlite"),
            brand: "Topps".into(),
            batch_size: 50,
            delete_batch_size: 100,
        }
    }
}

impl Settings {
    /// Defaults, then `ingest.toml` if present, then `SCRAPER_*` env vars.
    pub fn load() -> Result<Settings> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Settings> {
        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn pacing(&self) -> PacingSettings {
        PacingSettings {
            base_delay: Duration::from_millis(self.delay),
            jitter_max: Duration::from_millis(self.delay_random),
            backoff_base: Duration::from_millis(self.delay),
            backoff_multiplier: self.backoff_multiplier,
            max_retries: self.max_retries,
        }
    }

    pub fn discovery(&self) -> DiscoverySettings {
        DiscoverySettings {
            listing_url: self.listing_url.clone(),
            document_extension: self.document_extension.clone(),
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            consent_banner_selector: self.consent_banner_selector.clone(),
            consent_accept_selector: self.consent_accept_selector.clone(),
            consent_timeout: Duration::from_millis(self.consent_timeout_ms),
            consent_dismiss_timeout: Duration::from_millis(self.consent_dismiss_timeout_ms),
        }
    }

    pub fn fetch(&self) -> FetchSettings {
        FetchSettings {
            cache_dir: self.cache_dir.clone(),
            corruption_threshold: self.corruption_threshold,
            scroll_settle: Duration::from_millis(self.scroll_settle_ms),
        }
    }

    pub fn browser(&self) -> BrowserSettings {
        BrowserSettings {
            user_agent: self.user_agent.clone(),
            referer: self.referer.clone(),
            headless: self.headless,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PacingSettings {
    pub base_delay: Duration,
    pub jitter_max: Duration,
    pub backoff_base: Duration,
    pub backoff_multiplier: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub listing_url: String,
    pub document_extension: String,
    pub navigation_timeout: Duration,
    pub consent_banner_selector: String,
    pub consent_accept_selector: String,
    pub consent_timeout: Duration,
    pub consent_dismiss_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub cache_dir: PathBuf,
    pub corruption_threshold: u64,
    pub scroll_settle: Duration,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub user_agent: String,
    pub referer: String,
    pub headless: bool,
}
