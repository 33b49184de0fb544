use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSettings;
use crate::error::{IngestError, IngestResult};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Visible,
    Hidden,
}

/// Raw answer of an in-page fetch. `body_base64` is `None` when the request
/// never produced a body (non-2xx or network error).
#[derive(Debug, Clone, Deserialize)]
pub struct BinaryResponse {
    pub status: u16,
    #[serde(rename = "data")]
    pub body_base64: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BinaryResponse {
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn decode_body(&self) -> IngestResult<Vec<u8>> {
        let data = self
            .body_base64
            .as_deref()
            .ok_or_else(|| IngestError::Browser("response carried no body".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| IngestError::Browser(format!("invalid base64 body: {}", e)))
    }
}

/// What the pipeline needs from a browser automation session, and nothing more.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` and wait for the network to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> IngestResult<()>;

    /// Wait until `selector` reaches `state`. Times out with `IngestError::Browser`.
    async fn wait_for(&self, selector: &str, state: WaitState, timeout: Duration)
        -> IngestResult<()>;

    /// Evaluate a JS expression in page context and return its JSON value.
    async fn evaluate(&self, script: &str) -> IngestResult<Value>;

    /// GET `url` from inside the page, carrying the session's cookies.
    async fn fetch_binary(&self, url: &str) -> IngestResult<BinaryResponse>;
}

/// Quote a string as a JS literal.
pub fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn visibility_script(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            const st = window.getComputedStyle(el);
            return st.display !== 'none' && st.visibility !== 'hidden' && el.offsetParent !== null;
        }})()"#,
        sel = js_str(selector)
    )
}

fn fetch_script(url: &str) -> String {
    format!(
        r#"(async () => {{
            try {{
                const res = await fetch({url}, {{
                    method: 'GET',
                    credentials: 'include',
                    headers: {{ 'Accept': 'application/pdf' }}
                }});
                if (!res.ok) return {{ status: res.status, data: null }};
                const blob = await res.blob();
                const dataUrl = await new Promise((resolve, reject) => {{
                    const reader = new FileReader();
                    reader.onloadend = () => resolve(reader.result);
                    reader.onerror = () => reject(reader.error);
                    reader.readAsDataURL(blob);
                }});
                return {{ status: res.status, data: String(dataUrl).split(',')[1] || '' }};
            }} catch (e) {{
                return {{ status: 0, data: null, error: String(e) }};
            }}
        }})()"#,
        url = js_str(url)
    )
}

/// Headless Chromium driven over CDP.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserSettings) -> IngestResult<Self> {
        let mut builder = BrowserConfig::builder().no_sandbox();
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(IngestError::Browser)?;

        info!("Launching browser (headless: {})", settings.headless);
        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
        page.set_user_agent(settings.user_agent.clone())
            .await
            .map_err(cdp_err)?;
        let headers = Headers::new(json!({
            "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            "Accept-Language": "en-US,en;q=0.5",
            "Referer": settings.referer,
            "Cache-Control": "no-cache",
            "Pragma": "no-cache",
        }));
        page.execute(SetExtraHttpHeadersParams::new(headers))
            .await
            .map_err(cdp_err)?;
        debug!("Browser session ready");

        Ok(ChromeSession {
            browser,
            page,
            handler,
        })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

fn cdp_err(e: chromiumoxide::error::CdpError) -> IngestError {
    IngestError::Browser(e.to_string())
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> IngestResult<()> {
        let nav = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, nav).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(IngestError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(IngestError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {:.0}s", timeout.as_secs_f64()),
            }),
        }
    }

    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> IngestResult<()> {
        let script = visibility_script(selector);
        let want_visible = state == WaitState::Visible;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let visible = self.evaluate(&script).await?.as_bool().unwrap_or(false);
            if visible == want_visible {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(IngestError::Browser(format!(
                    "timed out waiting for {} to be {:?}",
                    selector, state
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> IngestResult<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(IngestError::Browser)?;
        let result = self.page.evaluate_expression(params).await.map_err(cdp_err)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn fetch_binary(&self, url: &str) -> IngestResult<BinaryResponse> {
        let value = self.evaluate(&fetch_script(url)).await?;
        serde_json::from_value(value)
            .map_err(|e| IngestError::Browser(format!("unexpected fetch result: {}", e)))
    }
}
