//! Navigation state machine from landing page to results page.
//!
//! One machine drives one attempt on one session:
//!
//! ```text
//! Init -> MainPageLoaded -> LinkClicked -> SearchPageReady -> FormSubmitted -> ResultsReady
//! ```
//!
//! Both risky transitions (after the category link and after the form
//! submit) go through [`ChallengeDetector::settle`]. Any step may end in
//! `Error(kind)`. Cancellation is observed between transitions.

use crate::challenge::{ChallengeDetector, SettleError};
use crate::definition::{Checkpoint, IdentifierRoute, PortalDefinition};
use crate::error::NavigationError;
use leasedrop_browser::{BrowserActions, BrowserError, Locator};
use leasedrop_core::{ErrorKind, PageState, Query};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RESET_STORAGE_SCRIPT: &str =
    "window.localStorage.clear(); window.sessionStorage.clear(); navigator.cookieEnabled";

/// Drives one session from `Init` to `ResultsReady`.
///
/// Single-use: [`run`](Self::run) consumes the machine.
pub struct NavigationStateMachine<'a, S: BrowserActions + ?Sized> {
    session: &'a S,
    definition: &'a PortalDefinition,
    detector: &'a ChallengeDetector,
    interactive_wait: Duration,
    state: watch::Sender<PageState>,
}

type StepResult<T> = std::result::Result<T, NavigationError>;

impl<'a, S: BrowserActions + ?Sized> NavigationStateMachine<'a, S> {
    /// Create a machine in `Init`.
    pub fn new(
        session: &'a S,
        definition: &'a PortalDefinition,
        detector: &'a ChallengeDetector,
        interactive_wait: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PageState::Init);
        Self {
            session,
            definition,
            detector,
            interactive_wait,
            state,
        }
    }

    /// Live view of the machine's state, valid after `run` is dropped.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PageState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PageState {
        *self.state.borrow()
    }

    /// Run every transition and return the results page HTML.
    pub async fn run(self, query: &Query, cancel: &CancellationToken) -> StepResult<String> {
        match self.drive(query, cancel).await {
            Ok(html) => Ok(html),
            Err(err) => {
                if let Some(kind) = err.kind() {
                    self.state.send_replace(PageState::Error(kind));
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, query: &Query, cancel: &CancellationToken) -> StepResult<String> {
        let route = self.definition.route(query.identifier_type());

        self.check_cancelled(cancel)?;
        self.load_main_page().await?;
        self.advance(PageState::MainPageLoaded);

        self.check_cancelled(cancel)?;
        self.click_category_link(route).await?;
        self.advance(PageState::LinkClicked);

        self.check_cancelled(cancel)?;
        self.pass_checkpoint(&self.definition.search_checkpoint, cancel)
            .await?;
        self.advance(PageState::SearchPageReady);

        self.check_cancelled(cancel)?;
        self.fill_and_submit(query, route).await?;
        self.advance(PageState::FormSubmitted);

        self.check_cancelled(cancel)?;
        self.pass_checkpoint(&self.definition.results_checkpoint, cancel)
            .await?;
        self.advance(PageState::ResultsReady);

        self.session
            .content()
            .await
            .map_err(|e| NavigationError::from_browser(&e, PageState::ResultsReady))
    }

    fn advance(&self, next: PageState) {
        let previous = self.state.send_replace(next);
        info!(from = %previous, to = %next, "page state transition");
    }

    fn check_cancelled(&self, cancel: &CancellationToken) -> StepResult<()> {
        if cancel.is_cancelled() {
            return Err(NavigationError::Cancelled {
                state: self.state(),
            });
        }
        Ok(())
    }

    fn browser_error(&self, err: &BrowserError) -> NavigationError {
        NavigationError::from_browser(err, self.state())
    }

    /// Landing page, cookie flag, then the session check page with recovery.
    async fn load_main_page(&self) -> StepResult<()> {
        let def = self.definition;
        self.open_landing_page().await?;

        let Some(check_url) = def.session_check_url.as_deref() else {
            return Ok(());
        };
        self.navigate(check_url).await?;

        let mut recoveries = 0;
        while self.cookies_refused().await {
            if recoveries >= def.cookie_recovery_attempts {
                return Err(NavigationError::failed(
                    ErrorKind::Navigation,
                    self.state(),
                    format!(
                        "\"{}\" persisted after {recoveries} recovery attempts",
                        def.cookie_refusal_text
                    ),
                ));
            }
            recoveries += 1;
            warn!(
                attempt = recoveries,
                max = def.cookie_recovery_attempts,
                "session check refused cookies, re-establishing session"
            );
            if let Err(e) = self.session.evaluate(RESET_STORAGE_SCRIPT).await {
                debug!("Storage reset skipped: {}", e);
            }
            self.open_landing_page().await?;
            self.navigate(check_url).await?;
        }
        Ok(())
    }

    async fn open_landing_page(&self) -> StepResult<()> {
        self.navigate(&self.definition.landing_url).await?;
        if let Some(script) = self.definition.cookie_flag_script.as_deref() {
            if let Err(e) = self.session.evaluate(script).await {
                debug!("Cookie flag script failed: {}", e);
            }
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> StepResult<()> {
        self.session.navigate(url).await.map_err(|e| {
            NavigationError::failed(ErrorKind::Navigation, self.state(), e.to_string())
        })
    }

    async fn cookies_refused(&self) -> bool {
        let text = self.definition.cookie_refusal_text.as_str();
        if text.is_empty() {
            return false;
        }
        let in_title = self
            .session
            .title()
            .await
            .is_ok_and(|title| title.contains(text));
        in_title
            || self
                .session
                .content()
                .await
                .is_ok_and(|html| html.contains(text))
    }

    async fn click_category_link(&self, route: &IdentifierRoute) -> StepResult<()> {
        let link = self.resolve_first(&route.link).await?;
        self.session
            .click(link)
            .await
            .map_err(|e| self.browser_error(&e))
    }

    /// Give the page the normal interactive wait, then settle any challenge.
    async fn pass_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        cancel: &CancellationToken,
    ) -> StepResult<()> {
        let arrived = self
            .detector
            .await_ready(self.session, checkpoint, self.interactive_wait)
            .await;
        debug!(checkpoint = %checkpoint.name, arrived, "checkpoint arrival");

        let state = &self.state;
        let outcome = self
            .detector
            .settle(self.session, checkpoint, cancel, |_| {
                state.send_replace(PageState::ChallengeDetected);
            })
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(SettleError::Cancelled) => Err(NavigationError::Cancelled {
                state: self.state(),
            }),
            Err(SettleError::Blocked(reason)) => Err(NavigationError::failed(
                ErrorKind::ChallengeBlocked,
                self.state(),
                reason,
            )),
        }
    }

    async fn fill_and_submit(&self, query: &Query, route: &IdentifierRoute) -> StepResult<()> {
        let def = self.definition;
        let fields: [(&[Locator], &str); 3] = [
            (route.field.as_slice(), query.identifier_value().as_str()),
            (def.beg_period_field.as_slice(), query.beg_period().as_str()),
            (def.end_period_field.as_slice(), query.end_period().as_str()),
        ];

        for (candidates, value) in fields {
            let field = self.resolve_first(candidates).await?;
            self.session
                .fill(field, value)
                .await
                .map_err(|e| self.browser_error(&e))?;
        }

        let submit = self.resolve_first(&def.submit).await?;
        self.session
            .submit(submit)
            .await
            .map_err(|e| self.browser_error(&e))
    }

    /// First candidate that becomes clickable. The primary locator gets
    /// the interactive wait; fallbacks are checked once the page has had it.
    async fn resolve_first<'l>(&self, candidates: &'l [Locator]) -> StepResult<&'l Locator> {
        let mut budget = self.interactive_wait;
        for locator in candidates {
            match self.session.wait_until_clickable(locator, budget).await {
                Ok(()) => {
                    debug!("Resolved {}", locator);
                    return Ok(locator);
                }
                Err(e) => debug!("Trying next candidate: {}", e),
            }
            budget = self.session.poll_interval();
        }

        let tried: Vec<String> = candidates.iter().map(ToString::to_string).collect();
        Err(NavigationError::failed(
            ErrorKind::ElementNotFound,
            self.state(),
            format!(
                "none clickable within {}ms: {}",
                self.interactive_wait.as_millis(),
                tried.join(", ")
            ),
        ))
    }
}
