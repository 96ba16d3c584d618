//! Scripted in-memory portal for driving the pipeline without a browser.
//!
//! [`FakePortal`] is a [`SessionFactory`] whose sessions simulate the
//! landing, session check, search and results pages of the built-in portal
//! definition. Each opened session follows the next [`PortalScript`] in the
//! queue; the last script repeats once the queue runs dry.

use leasedrop_browser::{BrowserActions, BrowserError, Locator, SessionFactory, Snapshot};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Challenge that never clears.
pub const PERSISTENT: u32 = u32::MAX;

/// How one simulated session behaves.
#[derive(Debug, Clone)]
pub struct PortalScript {
    /// Fail browser launch for this session
    pub launch_fails: bool,
    /// Every navigation fails
    pub navigation_fails: bool,
    /// Category link is on the landing page
    pub link_present: bool,
    /// Session check visits answered with "Cookies are required"
    pub cookie_refusals: u32,
    /// Inspections a challenge on the search page survives
    pub search_challenge: Option<u32>,
    /// Inspections a challenge on the results page survives
    pub results_challenge: Option<u32>,
    /// Inspections a redirect away from the search page survives
    pub search_redirect: Option<u32>,
    /// Page reads the search form keeps being served after submit
    pub submit_lag: Option<u32>,
    /// HTML served as the results page
    pub results_html: String,
    /// Diagnostics capture fails
    pub capture_fails: bool,
    /// Delay added to every navigation
    pub navigation_delay: Duration,
}

impl PortalScript {
    /// A session that reaches the results page and serves `results_html`.
    pub fn results(results_html: impl Into<String>) -> Self {
        Self {
            launch_fails: false,
            navigation_fails: false,
            link_present: true,
            cookie_refusals: 0,
            search_challenge: None,
            results_challenge: None,
            search_redirect: None,
            submit_lag: None,
            results_html: results_html.into(),
            capture_fails: false,
            navigation_delay: Duration::ZERO,
        }
    }

    /// A session whose results page stays behind a challenge.
    #[must_use]
    pub fn blocked() -> Self {
        Self {
            results_challenge: Some(PERSISTENT),
            ..Self::results("")
        }
    }
}

/// Counters shared by a factory and every session it opened.
#[derive(Debug, Default)]
pub struct FakeStats {
    opened: AtomicU32,
    closed: AtomicU32,
    close_calls: AtomicU32,
    launch_failures: AtomicU32,
}

impl FakeStats {
    /// Sessions successfully opened.
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions actually closed (first close call only).
    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every close call, including repeated ones.
    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Launches that failed.
    pub fn launch_failures(&self) -> u32 {
        self.launch_failures.load(Ordering::SeqCst)
    }

    /// Opened but not yet closed.
    pub fn live(&self) -> u32 {
        self.opened().saturating_sub(self.closed())
    }
}

/// Session factory over a queue of scripts.
#[derive(Debug)]
pub struct FakePortal {
    scripts: Mutex<VecDeque<PortalScript>>,
    stats: Arc<FakeStats>,
}

impl FakePortal {
    /// Factory serving `scripts` in order, repeating the last.
    pub fn new(scripts: impl IntoIterator<Item = PortalScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            stats: Arc::new(FakeStats::default()),
        }
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }

    fn next_script(&self) -> PortalScript {
        let mut scripts = lock(&self.scripts);
        if scripts.len() > 1 {
            scripts.pop_front().unwrap_or_else(|| PortalScript::results(""))
        } else {
            scripts
                .front()
                .cloned()
                .unwrap_or_else(|| PortalScript::results(""))
        }
    }

    /// Open a session directly from a script.
    pub fn session(script: PortalScript) -> FakeSession {
        FakeSession::new(script, Arc::new(FakeStats::default()))
    }
}

#[async_trait::async_trait]
impl SessionFactory for FakePortal {
    type Session = FakeSession;

    async fn open(&self) -> leasedrop_browser::Result<FakeSession> {
        let script = self.next_script();
        if script.launch_fails {
            self.stats.launch_failures.fetch_add(1, Ordering::SeqCst);
            return Err(BrowserError::Launch("scripted launch failure".to_string()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession::new(script, Arc::clone(&self.stats)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Blank,
    Landing,
    Check { refused: bool },
    Redirect,
    Search,
    SearchChallenge,
    SearchLingering,
    Results,
    ResultsChallenge,
}

#[derive(Debug)]
struct PageModel {
    screen: Screen,
    cookie_refusals_left: u32,
    challenge_left: u32,
    lag_left: u32,
    fills: Vec<(Locator, String)>,
    submitted: bool,
}

/// One simulated browser session.
#[derive(Debug)]
pub struct FakeSession {
    script: PortalScript,
    page: Mutex<PageModel>,
    stats: Arc<FakeStats>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl FakeSession {
    fn new(script: PortalScript, stats: Arc<FakeStats>) -> Self {
        Self {
            page: Mutex::new(PageModel {
                screen: Screen::Blank,
                cookie_refusals_left: script.cookie_refusals,
                challenge_left: 0,
                lag_left: 0,
                fills: Vec::new(),
                submitted: false,
            }),
            script,
            stats,
            closed: AtomicBool::new(false),
        }
    }

    /// Values filled so far, keyed by the locator that matched.
    pub fn fills(&self) -> Vec<(Locator, String)> {
        lock(&self.page).fills.clone()
    }

    /// Whether the search form was submitted.
    pub fn submitted(&self) -> bool {
        lock(&self.page).submitted
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> leasedrop_browser::Result<()> {
        if self.is_closed() {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    fn enter_challenge(page: &mut PageModel, survives: Option<u32>, challenge: Screen, target: Screen) {
        match survives {
            Some(n) if n > 0 => {
                page.screen = challenge;
                page.challenge_left = n;
            }
            _ => page.screen = target,
        }
    }

    fn leave_search(&self, page: &mut PageModel) {
        Self::enter_challenge(
            page,
            self.script.results_challenge,
            Screen::ResultsChallenge,
            Screen::Results,
        );
    }

    fn has_element(&self, screen: Screen, locator: &Locator) -> bool {
        let key = locator.to_string();
        match screen {
            Screen::Landing => self.script.link_present && key.contains("Lease Drop"),
            Screen::Search | Screen::SearchLingering => {
                ["leaseNum", "DPN", "begFilPrd", "endFilPrd", "Submit"]
                    .iter()
                    .any(|name| key.contains(name))
            }
            Screen::Results => key.contains("table"),
            Screen::SearchChallenge | Screen::ResultsChallenge => key.contains("recaptcha"),
            Screen::Blank | Screen::Check { .. } | Screen::Redirect => false,
        }
    }
}

#[async_trait::async_trait]
impl BrowserActions for FakeSession {
    async fn navigate(&self, url: &str) -> leasedrop_browser::Result<()> {
        self.ensure_open()?;
        if !self.script.navigation_delay.is_zero() {
            tokio::time::sleep(self.script.navigation_delay).await;
        }
        if self.script.navigation_fails {
            return Err(BrowserError::Navigation(format!("{url}: net::ERR_CONNECTION_RESET")));
        }
        let mut page = lock(&self.page);
        if url.contains("Index.jsp") {
            page.screen = Screen::Landing;
        } else if url.contains("phase=check") {
            let refused = page.cookie_refusals_left > 0;
            if refused {
                page.cookie_refusals_left -= 1;
            }
            page.screen = Screen::Check { refused };
        } else {
            return Err(BrowserError::Navigation(format!("{url}: unknown page")));
        }
        Ok(())
    }

    async fn is_clickable(&self, locator: &Locator) -> leasedrop_browser::Result<bool> {
        self.element_present(locator).await
    }

    async fn click(&self, locator: &Locator) -> leasedrop_browser::Result<()> {
        self.ensure_open()?;
        let mut page = lock(&self.page);
        if page.screen == Screen::Landing && self.has_element(Screen::Landing, locator) {
            if self.script.search_redirect.is_some() {
                Self::enter_challenge(
                    &mut page,
                    self.script.search_redirect,
                    Screen::Redirect,
                    Screen::Search,
                );
            } else {
                Self::enter_challenge(
                    &mut page,
                    self.script.search_challenge,
                    Screen::SearchChallenge,
                    Screen::Search,
                );
            }
            Ok(())
        } else {
            Err(BrowserError::Interaction(format!("{locator} vanished before click")))
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> leasedrop_browser::Result<()> {
        self.ensure_open()?;
        let mut page = lock(&self.page);
        if page.screen == Screen::Search {
            page.fills.push((locator.clone(), value.to_string()));
            Ok(())
        } else {
            Err(BrowserError::Interaction(format!("{locator} vanished before fill")))
        }
    }

    async fn submit(&self, locator: &Locator) -> leasedrop_browser::Result<()> {
        self.ensure_open()?;
        let mut page = lock(&self.page);
        if page.screen == Screen::Search {
            page.submitted = true;
            match self.script.submit_lag {
                Some(n) if n > 0 => {
                    page.screen = Screen::SearchLingering;
                    page.lag_left = n;
                }
                _ => self.leave_search(&mut page),
            }
            Ok(())
        } else {
            Err(BrowserError::Interaction(format!("{locator} vanished before submit")))
        }
    }

    async fn element_present(&self, locator: &Locator) -> leasedrop_browser::Result<bool> {
        self.ensure_open()?;
        let screen = lock(&self.page).screen;
        Ok(self.has_element(screen, locator))
    }

    async fn evaluate(&self, _script: &str) -> leasedrop_browser::Result<serde_json::Value> {
        self.ensure_open()?;
        Ok(serde_json::Value::Null)
    }

    async fn current_url(&self) -> leasedrop_browser::Result<String> {
        self.ensure_open()?;
        let url = match lock(&self.page).screen {
            Screen::Blank => "about:blank",
            Screen::Landing => "https://mycpa.cpa.state.tx.us/cong/Index.jsp",
            Screen::Check { .. } => "https://mycpa.cpa.state.tx.us/cong/loginForward.do?phase=check",
            Screen::Redirect => "https://mycpa.cpa.state.tx.us/cong/sessionQueue.do",
            Screen::Search | Screen::SearchChallenge | Screen::SearchLingering => {
                "https://mycpa.cpa.state.tx.us/cong/reportLeaseDropCOForward.do"
            }
            Screen::Results | Screen::ResultsChallenge => {
                "https://mycpa.cpa.state.tx.us/cong/reportLeaseDropCO.do"
            }
        };
        Ok(url.to_string())
    }

    /// Each title read counts as one inspection of a challenge screen.
    async fn title(&self) -> leasedrop_browser::Result<String> {
        self.ensure_open()?;
        let mut page = lock(&self.page);
        if matches!(
            page.screen,
            Screen::SearchChallenge | Screen::ResultsChallenge | Screen::Redirect
        ) && page.challenge_left != PERSISTENT
        {
            page.challenge_left = page.challenge_left.saturating_sub(1);
            if page.challenge_left == 0 {
                page.screen = match page.screen {
                    Screen::ResultsChallenge => Screen::Results,
                    _ => Screen::Search,
                };
            }
        }
        let title = match page.screen {
            Screen::Check { refused: true } => "Cookies are required",
            Screen::Redirect => "Please wait",
            Screen::Search | Screen::SearchChallenge | Screen::SearchLingering => {
                "Lease Drop - Crude Oil"
            }
            Screen::Results | Screen::ResultsChallenge => "Lease Drop - Crude Oil Report",
            _ => "Comptroller",
        };
        Ok(title.to_string())
    }

    /// Each read of a lingering search page counts toward the submit lag.
    async fn content(&self) -> leasedrop_browser::Result<String> {
        self.ensure_open()?;
        let screen = {
            let mut page = lock(&self.page);
            let screen = page.screen;
            if screen == Screen::SearchLingering && page.lag_left != PERSISTENT {
                page.lag_left = page.lag_left.saturating_sub(1);
                if page.lag_left == 0 {
                    self.leave_search(&mut page);
                }
            }
            screen
        };
        let html = match screen {
            Screen::Blank => String::new(),
            Screen::Landing if self.script.link_present => {
                "<html><body><a href='lease'>Lease Drop-Crude Oil</a></body></html>".to_string()
            }
            Screen::Landing => "<html><body><p>Maintenance</p></body></html>".to_string(),
            Screen::Check { refused: true } => {
                "<html><body><h1>Cookies are required</h1></body></html>".to_string()
            }
            Screen::Check { refused: false } => "<html><body>ok</body></html>".to_string(),
            Screen::Search => "<html><body><form><input name='leaseNum'><input name='DPN'>\
                <input name='begFilPrd'><input name='endFilPrd'>\
                <input type='submit' value='Submit'></form></body></html>"
                .to_string(),
            Screen::SearchLingering => "<html><body><table>\
                <tr><th colspan='2'>Lease Drop - Crude Oil</th></tr>\
                <tr><td>Lease Number</td><td><input name='leaseNum'></td></tr>\
                <tr><td>Beginning Period</td><td><input name='begFilPrd'></td></tr>\
                <tr><td>Ending Period</td><td><input name='endFilPrd'></td></tr>\
                <tr><td colspan='2'><input type='submit' value='Submit'></td></tr>\
                </table></body></html>"
                .to_string(),
            Screen::Redirect => {
                "<html><body><p>Please wait while your session is verified</p></body></html>"
                    .to_string()
            }
            Screen::SearchChallenge | Screen::ResultsChallenge => {
                "<html><body><div class='grecaptcha-badge'></div>\
                <iframe src='https://www.google.com/recaptcha/api2/bframe'></iframe></body></html>"
                    .to_string()
            }
            Screen::Results => self.script.results_html.clone(),
        };
        Ok(html)
    }

    async fn capture(&self) -> leasedrop_browser::Result<Snapshot> {
        self.ensure_open()?;
        if self.script.capture_fails {
            return Err(BrowserError::Chromium("screenshot target crashed".to_string()));
        }
        Ok(Snapshot {
            png: Some(vec![0x89, b'P', b'N', b'G']),
            url: self.current_url().await?,
            title: "snapshot".to_string(),
            html: self.content().await?,
        })
    }

    async fn close(&self) -> leasedrop_browser::Result<()> {
        self.stats.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(2)
    }
}
