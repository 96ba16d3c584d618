use crate::actions::{BrowserActions, SessionFactory, Snapshot};
use crate::error::{BrowserError, Result};
use crate::fingerprint::{FingerprintConfig, STEALTH_SCRIPT};
use crate::locator::{self, Locator};
use crate::wait::poll_until;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, NavigateParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use leasedrop_core::BrowserConfig;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READY_STATE_SCRIPT: &str = "document.readyState";

/// Launches Chromium-backed sessions from browser settings.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    /// Create a launcher for the given browser settings.
    #[must_use]
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl SessionFactory for ChromiumLauncher {
    type Session = BrowserSession;

    async fn open(&self) -> Result<BrowserSession> {
        BrowserSession::launch(&self.config).await
    }
}

/// One Chromium instance driving exactly one page.
pub struct BrowserSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    navigation_timeout: Duration,
    poll_interval: Duration,
}

impl BrowserSession {
    /// Launch a browser with a randomized fingerprint and the stealth script.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let fingerprint = FingerprintConfig::randomized(config.window_width, config.window_height);
        info!(
            "Launching browser (headless={}, viewport={}x{})",
            config.headless, fingerprint.viewport_width, fingerprint.viewport_height
        );

        let mut builder = ChromeConfig::builder()
            .window_size(config.window_width, config.window_height)
            .viewport(Viewport {
                width: fingerprint.viewport_width,
                height: fingerprint.viewport_height,
                ..Viewport::default()
            })
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        let chrome = builder.build().map_err(BrowserError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(chrome)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match Self::prepare_page(&browser, &fingerprint).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(BrowserError::Launch(e.to_string()));
            }
        };
        debug!(user_agent = %fingerprint.user_agent, "browser page prepared");

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler: Mutex::new(Some(handler_task)),
            closed: AtomicBool::new(false),
            navigation_timeout: config.navigation_timeout(),
            poll_interval: config.poll_interval(),
        })
    }

    async fn prepare_page(browser: &Browser, fingerprint: &FingerprintConfig) -> Result<Page> {
        let page = browser.new_page("about:blank").await?;
        page.execute(SetUserAgentOverrideParams::new(
            fingerprint.user_agent.clone(),
        ))
        .await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_SCRIPT.to_string(),
        ))
        .await?;
        Ok(page)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    /// Run one page operation under the navigation timeout.
    async fn bounded<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        tokio::time::timeout(self.navigation_timeout, op)
            .await
            .map_err(|_| {
                BrowserError::Timeout(format!(
                    "{what} exceeded {}s",
                    self.navigation_timeout.as_secs()
                ))
            })?
    }

    async fn eval_bool(&self, what: &str, script: String) -> Result<bool> {
        let value = self.evaluate(&script).await.map_err(|e| match e {
            BrowserError::Chromium(msg) => BrowserError::Interaction(format!("{what}: {msg}")),
            other => other,
        })?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

#[async_trait::async_trait]
impl BrowserActions for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| BrowserError::Navigation(format!("invalid URL {url}: {e}")))?;

        let response = self
            .bounded("navigation", async {
                self.page
                    .execute(params)
                    .await
                    .map_err(|e| BrowserError::Navigation(format!("{url}: {e}")))
            })
            .await
            .map_err(|e| match e {
                BrowserError::Timeout(msg) => BrowserError::Navigation(msg),
                other => other,
            })?;

        if let Some(error_text) = response.result.error_text.as_deref() {
            return Err(BrowserError::Navigation(format!("{url}: {error_text}")));
        }

        let settled = poll_until(self.navigation_timeout, self.poll_interval, move || async move {
            match self.page.evaluate(READY_STATE_SCRIPT).await {
                Ok(result) => result
                    .into_value::<String>()
                    .map(|state| state == "complete" || state == "interactive")
                    .unwrap_or(false),
                Err(e) => {
                    debug!("Ready state probe failed: {}", e);
                    false
                }
            }
        })
        .await;

        if settled {
            Ok(())
        } else {
            Err(BrowserError::Navigation(format!(
                "{url} did not settle within {}s",
                self.navigation_timeout.as_secs()
            )))
        }
    }

    async fn is_clickable(&self, locator: &Locator) -> Result<bool> {
        self.eval_bool("clickable probe", locator::clickable_script(locator))
            .await
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        debug!("Clicking {}", locator);
        if self.eval_bool("click", locator::click_script(locator)).await? {
            Ok(())
        } else {
            Err(BrowserError::Interaction(format!("{locator} vanished before click")))
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        debug!("Filling {}", locator);
        if self
            .eval_bool("fill", locator::fill_script(locator, value))
            .await?
        {
            Ok(())
        } else {
            Err(BrowserError::Interaction(format!("{locator} vanished before fill")))
        }
    }

    async fn submit(&self, locator: &Locator) -> Result<()> {
        debug!("Submitting via {}", locator);
        if self
            .eval_bool("submit", locator::submit_script(locator))
            .await?
        {
            Ok(())
        } else {
            Err(BrowserError::Interaction(format!("{locator} vanished before submit")))
        }
    }

    async fn element_present(&self, locator: &Locator) -> Result<bool> {
        self.eval_bool("presence probe", locator::present_script(locator))
            .await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .bounded("script", async {
                self.page.evaluate(script).await.map_err(BrowserError::from)
            })
            .await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .bounded("url", async { self.page.url().await.map_err(BrowserError::from) })
            .await?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&self) -> Result<String> {
        self.bounded("content", async {
            self.page.content().await.map_err(BrowserError::from)
        })
        .await
    }

    async fn capture(&self) -> Result<Snapshot> {
        self.ensure_open()?;

        let png = match self
            .bounded("screenshot", async {
                self.page
                    .screenshot(
                        ScreenshotParams::builder()
                            .format(CaptureScreenshotFormat::Png)
                            .full_page(true)
                            .build(),
                    )
                    .await
                    .map_err(BrowserError::from)
            })
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        };

        Ok(Snapshot {
            png,
            url: self.current_url().await.unwrap_or_default(),
            title: self.title().await.unwrap_or_default(),
            html: self.content().await.unwrap_or_default(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing browser session");

        let _ = self.page.clone().close().await;
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser close failed: {}", e);
            }
            let _ = browser.wait().await;
        }
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("Browser session dropped without close; killing browser");
            // Dropping the launched browser kills its child process.
            drop(self.browser.get_mut().take());
            if let Some(handler) = self.handler.get_mut().take() {
                handler.abort();
            }
        }
    }
}
