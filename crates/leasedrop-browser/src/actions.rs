use crate::error::{BrowserError, Result};
use crate::locator::Locator;
use crate::wait::poll_until;
use std::time::Duration;

/// Page state captured for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// PNG screenshot, absent when the page could not render one
    pub png: Option<Vec<u8>>,
    pub url: String,
    pub title: String,
    pub html: String,
}

/// Browser actions for automation.
///
/// One implementor owns one page. Callers never use a session concurrently.
#[async_trait::async_trait]
pub trait BrowserActions: Send + Sync {
    /// Load a URL and wait for the document to settle.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Whether the element exists, is visible and is enabled.
    async fn is_clickable(&self, locator: &Locator) -> Result<bool>;

    /// Click an element; a vanished element is an `Interaction` error.
    async fn click(&self, locator: &Locator) -> Result<()>;

    /// Set a form field's value.
    async fn fill(&self, locator: &Locator, value: &str) -> Result<()>;

    /// Submit a form or press its submit control.
    async fn submit(&self, locator: &Locator) -> Result<()>;

    /// Whether any element matches.
    async fn element_present(&self, locator: &Locator) -> Result<bool>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// URL of the current document.
    async fn current_url(&self) -> Result<String>;

    /// Title of the current document.
    async fn title(&self) -> Result<String>;

    /// Serialized HTML of the current document.
    async fn content(&self) -> Result<String>;

    /// Screenshot plus URL, title and HTML.
    async fn capture(&self) -> Result<Snapshot>;

    /// Release the page and browser. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    /// Interval between element polls.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(250)
    }

    /// Poll until the element is clickable or `timeout` elapses.
    async fn wait_until_clickable(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let found = poll_until(timeout, self.poll_interval(), move || async move {
            self.is_clickable(locator).await.unwrap_or(false)
        })
        .await;

        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(format!(
                "{locator} not clickable within {}ms",
                timeout.as_millis()
            )))
        }
    }
}

/// Opens fresh browser sessions, one per retrieval attempt.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Session type produced by this factory.
    type Session: BrowserActions + 'static;

    /// Launch a browser with exactly one page.
    async fn open(&self) -> Result<Self::Session>;
}
