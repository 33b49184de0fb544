//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::browser::{BinaryResponse, BrowserSession, WaitState};
use crate::config::PacingSettings;
use crate::error::{IngestError, IngestResult};
use crate::extract::{DecodedText, TextDecoder};
use crate::pacing::Pacer;

pub fn fast_pacer(max_retries: u32) -> Pacer {
    Pacer::new(PacingSettings {
        base_delay: Duration::ZERO,
        jitter_max: Duration::ZERO,
        backoff_base: Duration::ZERO,
        backoff_multiplier: 2,
        max_retries,
    })
}

pub fn pdf_response(len: usize) -> BinaryResponse {
    let body = vec![b'%'; len];
    BinaryResponse {
        status: 200,
        body_base64: Some(base64::engine::general_purpose::STANDARD.encode(body)),
        error: None,
    }
}

pub fn status_response(status: u16) -> BinaryResponse {
    BinaryResponse {
        status,
        body_base64: None,
        error: None,
    }
}

/// Scripted stand-in for a browser session.
#[derive(Default)]
pub struct FakeBrowser {
    fail_navigation: bool,
    consent_banner: bool,
    sticky_banner: bool,
    links: Option<Value>,
    responses: Mutex<VecDeque<BinaryResponse>>,
    navigations: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn with_consent_banner(mut self) -> Self {
        self.consent_banner = true;
        self
    }

    /// A banner whose accept button does nothing.
    pub fn with_sticky_banner(mut self) -> Self {
        self.consent_banner = true;
        self.sticky_banner = true;
        self
    }

    pub fn with_links(mut self, links: Value) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_responses(self, responses: Vec<BinaryResponse>) -> Self {
        self.responses.lock().unwrap().extend(responses);
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn navigate(&self, url: &str, _timeout: Duration) -> IngestResult<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        if self.fail_navigation {
            return Err(IngestError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        Ok(())
    }

    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        _timeout: Duration,
    ) -> IngestResult<()> {
        let timed_out = match state {
            WaitState::Visible => !self.consent_banner,
            WaitState::Hidden => self.sticky_banner,
        };
        if timed_out {
            return Err(IngestError::Browser(format!(
                "timed out waiting for {}",
                selector
            )));
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> IngestResult<Value> {
        self.scripts.lock().unwrap().push(script.to_string());
        if script.contains("totalLinks") {
            return Ok(json!({ "totalLinks": 12, "headings": ["Checklists"], "bodyText": "" }));
        }
        if script.contains("el.click()") {
            return Ok(Value::Bool(self.consent_banner));
        }
        if script.contains("scrollIntoView") {
            return Ok(Value::Bool(true));
        }
        if script.contains("querySelectorAll") {
            return Ok(self.links.clone().unwrap_or_else(|| json!([])));
        }
        Ok(Value::Null)
    }

    async fn fetch_binary(&self, url: &str) -> IngestResult<BinaryResponse> {
        self.fetches.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| IngestError::Browser("no scripted response left".into()))
    }
}

/// Decoder that treats the bytes as UTF-8 text; `FAIL` content errors out.
pub struct PlainTextDecoder;

impl TextDecoder for PlainTextDecoder {
    fn decode(&self, filename: &str, bytes: &[u8]) -> IngestResult<DecodedText> {
        let text = String::from_utf8_lossy(bytes).to_string();
        if text.starts_with("FAIL") {
            return Err(IngestError::ExtractionFailed {
                filename: filename.to_string(),
                reason: "unreadable".into(),
            });
        }
        Ok(DecodedText {
            text,
            page_count: None,
        })
    }
}
