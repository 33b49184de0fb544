use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::browser::{js_str, BrowserSession, WaitState};
use crate::config::DiscoverySettings;
use crate::error::{IngestError, IngestResult};
use crate::pacing::Pacer;

/// Where a link sits on the listing page: the n-th match of `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: String,
    pub index: usize,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.selector, self.index)
    }
}

/// A checklist link found on the listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub url: String,
    pub title: String,
    pub locator: Locator,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDiagnostics {
    pub total_links: usize,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub body_text: String,
}

/// Outcome of the consent banner step. Never fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentOutcome {
    Accepted,
    NoAcceptControl,
    NotShown,
}

/// CSS selector for anchors pointing at documents with `extension`.
pub fn link_selector(extension: &str) -> String {
    format!("a[href$={}]", js_str(extension))
}

fn links_script(selector: &str) -> String {
    format!(
        r#"Array.from(document.querySelectorAll({sel})).map((a, i) => ({{
            url: a.href,
            title: (a.textContent || '').trim(),
            locator: {{ selector: {sel}, index: i }}
        }}))"#,
        sel = js_str(selector)
    )
}

const DIAGNOSTICS_SCRIPT: &str = r#"(() => ({
    totalLinks: document.querySelectorAll('a').length,
    headings: Array.from(document.querySelectorAll('h1, h2')).map(h => (h.textContent || '').trim()),
    bodyText: (document.body ? document.body.textContent || '' : '').trim().substring(0, 200)
}))()"#;

fn click_script(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.click();
            return true;
        }})()"#,
        sel = js_str(selector)
    )
}

/// Render the listing page and collect document links, in page order.
///
/// Only a failed navigation is fatal. An empty result logs page diagnostics.
pub async fn discover_documents<B>(
    browser: &B,
    pacer: &Pacer,
    settings: &DiscoverySettings,
    limit: Option<usize>,
) -> IngestResult<Vec<DocumentRef>>
where
    B: BrowserSession + ?Sized,
{
    info!("Navigating to {}", settings.listing_url);
    browser
        .navigate(&settings.listing_url, settings.navigation_timeout)
        .await?;

    match accept_consent(browser, settings).await {
        Ok(outcome) => debug!("Consent banner: {:?}", outcome),
        Err(e) => warn!("{}", e),
    }

    pacer.pause().await;

    let selector = link_selector(&settings.document_extension);
    let value = browser.evaluate(&links_script(&selector)).await?;
    let mut links: Vec<DocumentRef> = serde_json::from_value(value)
        .map_err(|e| IngestError::Browser(format!("unexpected link list: {}", e)))?;
    info!("Found {} document links", links.len());

    if links.is_empty() {
        let diag = page_diagnostics(browser).await;
        warn!(
            total_links = diag.total_links,
            headings = ?diag.headings,
            body = %diag.body_text,
            "No document links on listing page"
        );
    }

    if let Some(n) = limit {
        links.truncate(n);
    }
    Ok(links)
}

/// Dismiss the cookie banner if one shows up.
///
/// A banner that never appears is the common case, not an error.
pub async fn accept_consent<B>(
    browser: &B,
    settings: &DiscoverySettings,
) -> Result<ConsentOutcome, IngestError>
where
    B: BrowserSession + ?Sized,
{
    let banner = &settings.consent_banner_selector;
    if browser
        .wait_for(banner, WaitState::Visible, settings.consent_timeout)
        .await
        .is_err()
    {
        return Ok(ConsentOutcome::NotShown);
    }

    let clicked = browser
        .evaluate(&click_script(&settings.consent_accept_selector))
        .await
        .map_err(|e| IngestError::ConsentInterstitial(e.to_string()))?;
    if clicked != Value::Bool(true) {
        return Ok(ConsentOutcome::NoAcceptControl);
    }

    browser
        .wait_for(banner, WaitState::Hidden, settings.consent_dismiss_timeout)
        .await
        .map_err(|e| IngestError::ConsentInterstitial(e.to_string()))?;
    Ok(ConsentOutcome::Accepted)
}

async fn page_diagnostics<B>(browser: &B) -> PageDiagnostics
where
    B: BrowserSession + ?Sized,
{
    match browser.evaluate(DIAGNOSTICS_SCRIPT).await {
        Ok(v) => serde_json::from_value(v).unwrap_or_default(),
        Err(e) => {
            debug!("Diagnostics unavailable: {}", e);
            PageDiagnostics::default()
        }
    }
}
