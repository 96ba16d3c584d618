//! Anti-automation challenge detection and the settle-wait policy.

use crate::definition::{ChallengeMarkers, Checkpoint};
use leasedrop_browser::{poll_until, BrowserActions, Locator};
use leasedrop_core::ChallengeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Page is where the checkpoint expects, with no markers
    Clear,
    /// A challenge marker was found
    Present,
    /// The page could not be probed
    Unknown,
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => f.write_str("clear"),
            Self::Present => f.write_str("present"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Status plus the marker that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Clear, present or unknown
    pub status: ChallengeStatus,
    /// Marker or probe failure behind the status; empty when clear
    pub reason: String,
}

impl Inspection {
    fn clear() -> Self {
        Self {
            status: ChallengeStatus::Clear,
            reason: String::new(),
        }
    }

    fn present(reason: impl Into<String>) -> Self {
        Self {
            status: ChallengeStatus::Present,
            reason: reason.into(),
        }
    }

    fn unknown(reason: impl Into<String>) -> Self {
        Self {
            status: ChallengeStatus::Unknown,
            reason: reason.into(),
        }
    }
}

/// Why settling stopped without a clear page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleError {
    /// Challenge persisted through every settle cycle
    Blocked(String),
    /// Cancellation was observed during a settle-wait
    Cancelled,
}

/// Inspects pages for challenge markers and waits them out.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    markers: ChallengeMarkers,
    settle_wait: Duration,
    max_settle_cycles: u32,
}

impl ChallengeDetector {
    /// Build a detector with the given markers and policy.
    #[must_use]
    pub fn new(markers: ChallengeMarkers, config: &ChallengeConfig, interactive_wait: Duration) -> Self {
        Self {
            markers,
            settle_wait: config.settle_wait(interactive_wait),
            max_settle_cycles: config.max_settle_cycles.max(1),
        }
    }

    /// Extended settle-wait applied per cycle.
    #[must_use]
    pub fn settle_wait(&self) -> Duration {
        self.settle_wait
    }

    /// Poll until the previous page is gone and the checkpoint's ready
    /// elements appear, or `timeout` elapses.
    pub async fn await_ready<S>(&self, session: &S, checkpoint: &Checkpoint, timeout: Duration) -> bool
    where
        S: BrowserActions + ?Sized,
    {
        poll_until(timeout, session.poll_interval(), move || async move {
            let Ok(html) = session.content().await else {
                return false;
            };
            matches!(lingering(session, checkpoint).await, Ok(None))
                && ready_present(session, checkpoint, &html).await == Ok(true)
        })
        .await
    }

    /// Inspect the current page against a checkpoint. Never fails: a probe
    /// error yields `Unknown`.
    pub async fn inspect<S>(&self, session: &S, checkpoint: &Checkpoint) -> Inspection
    where
        S: BrowserActions + ?Sized,
    {
        let url = match session.current_url().await {
            Ok(url) => url,
            Err(e) => return Inspection::unknown(format!("url probe failed: {e}")),
        };
        let title = match session.title().await {
            Ok(title) => title,
            Err(e) => return Inspection::unknown(format!("title probe failed: {e}")),
        };
        let html = match session.content().await {
            Ok(html) => html,
            Err(e) => return Inspection::unknown(format!("content probe failed: {e}")),
        };

        if let Some(text) = self
            .markers
            .blocking_texts
            .iter()
            .find(|text| html.contains(text.as_str()) || title.contains(text.as_str()))
        {
            return Inspection::present(format!("blocking text \"{text}\""));
        }

        let badges: &[Locator] = if checkpoint.check_badges {
            &self.markers.badges
        } else {
            &[]
        };
        for selector in self.markers.selectors.iter().chain(badges) {
            match session.element_present(selector).await {
                Ok(true) => return Inspection::present(format!("challenge element {selector}")),
                Ok(false) => {}
                Err(e) => return Inspection::unknown(format!("marker probe failed: {e}")),
            }
        }

        if !checkpoint.location_matches(&url, &title) {
            return Inspection::present(format!(
                "redirected away from {} checkpoint to {url}",
                checkpoint.name
            ));
        }

        match lingering(session, checkpoint).await {
            Ok(Some(locator)) => {
                return Inspection::present(format!(
                    "{} checkpoint not reached: {locator} still present",
                    checkpoint.name
                ));
            }
            Ok(None) => {}
            Err(reason) => return Inspection::unknown(reason),
        }

        match ready_present(session, checkpoint, &html).await {
            Ok(true) => Inspection::clear(),
            Ok(false) => Inspection::present(format!(
                "{} checkpoint ready elements absent",
                checkpoint.name
            )),
            Err(reason) => Inspection::unknown(reason),
        }
    }

    /// Inspect and, while a challenge persists, apply the settle-wait and
    /// re-inspect, up to `max_settle_cycles` times.
    ///
    /// `on_detected` runs once per cycle in which a challenge is assumed.
    pub async fn settle<S, F>(
        &self,
        session: &S,
        checkpoint: &Checkpoint,
        cancel: &CancellationToken,
        mut on_detected: F,
    ) -> Result<(), SettleError>
    where
        S: BrowserActions + ?Sized,
        F: FnMut(&Inspection) + Send,
    {
        let mut inspection = self.inspect(session, checkpoint).await;
        let mut previous_unknown = false;

        for cycle in 1..=self.max_settle_cycles {
            if Self::passes(&inspection, previous_unknown) {
                debug!(checkpoint = %checkpoint.name, cycle, "checkpoint clear");
                return Ok(());
            }
            previous_unknown = inspection.status == ChallengeStatus::Unknown;

            warn!(
                checkpoint = %checkpoint.name,
                status = %inspection.status,
                reason = %inspection.reason,
                cycle,
                "challenge detected, settling"
            );
            on_detected(&inspection);

            let wait = self.await_ready(session, checkpoint, self.settle_wait);
            tokio::select! {
                () = cancel.cancelled() => return Err(SettleError::Cancelled),
                settled = wait => debug!(checkpoint = %checkpoint.name, settled, "settle-wait finished"),
            }

            inspection = self.inspect(session, checkpoint).await;
        }

        if Self::passes(&inspection, previous_unknown) {
            info!(checkpoint = %checkpoint.name, "challenge cleared");
            return Ok(());
        }
        Err(SettleError::Blocked(format!(
            "{} checkpoint still blocked after {} settle cycles: {}",
            checkpoint.name, self.max_settle_cycles, inspection.reason
        )))
    }

    /// `Unknown` passes only when the previous cycle was also `Unknown`.
    fn passes(inspection: &Inspection, previous_unknown: bool) -> bool {
        match inspection.status {
            ChallengeStatus::Clear => true,
            ChallengeStatus::Unknown => previous_unknown,
            ChallengeStatus::Present => false,
        }
    }
}

/// First element of the previous page that is still present.
async fn lingering<'c, S>(session: &S, checkpoint: &'c Checkpoint) -> Result<Option<&'c Locator>, String>
where
    S: BrowserActions + ?Sized,
{
    for locator in &checkpoint.gone {
        match session.element_present(locator).await {
            Ok(true) => return Ok(Some(locator)),
            Ok(false) => {}
            Err(e) => return Err(format!("departure check failed: {e}")),
        }
    }
    Ok(None)
}

/// Whether any ready element or ready text of the checkpoint is present.
async fn ready_present<S>(session: &S, checkpoint: &Checkpoint, html: &str) -> Result<bool, String>
where
    S: BrowserActions + ?Sized,
{
    if checkpoint
        .ready_texts
        .iter()
        .any(|text| html.contains(text.as_str()))
    {
        return Ok(true);
    }
    for locator in &checkpoint.ready {
        match session.element_present(locator).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => return Err(format!("ready probe failed: {e}")),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PortalDefinition;
    use crate::testing::{FakePortal, PortalScript, PERSISTENT};
    use leasedrop_browser::BrowserActions;

    fn detector() -> ChallengeDetector {
        let config = ChallengeConfig {
            settle_multiplier: 1,
            max_settle_cycles: 2,
        };
        ChallengeDetector::new(
            PortalDefinition::default().challenge,
            &config,
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_settle_wait_scales_interactive_wait() {
        let config = ChallengeConfig::default();
        let detector = ChallengeDetector::new(
            ChallengeMarkers::default(),
            &config,
            Duration::from_secs(5),
        );
        assert_eq!(detector.settle_wait(), Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_landing_page_is_not_search_checkpoint() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript::results(""));
        session.navigate(&definition.landing_url).await.unwrap();

        let inspection = detector()
            .inspect(&session, &definition.search_checkpoint)
            .await;
        assert_eq!(inspection.status, ChallengeStatus::Present);
        assert!(inspection.reason.contains("redirected away"));
    }

    #[tokio::test]
    async fn test_redirect_settles_to_clear() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript {
            search_redirect: Some(2),
            ..PortalScript::results("")
        });
        session.navigate(&definition.landing_url).await.unwrap();
        session.click(&definition.lease_number.link[0]).await.unwrap();

        let mut reasons = Vec::new();
        let outcome = detector()
            .settle(
                &session,
                &definition.search_checkpoint,
                &CancellationToken::new(),
                |inspection| reasons.push(inspection.reason.clone()),
            )
            .await;

        assert_eq!(outcome, Ok(()));
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("redirected away from search checkpoint"));
        assert_eq!(
            detector().inspect(&session, &definition.search_checkpoint).await.status,
            ChallengeStatus::Clear
        );
    }

    #[tokio::test]
    async fn test_search_form_after_submit_is_not_results() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript {
            submit_lag: Some(PERSISTENT),
            ..PortalScript::results("<table><tr><th>Period</th></tr></table>")
        });
        session.navigate(&definition.landing_url).await.unwrap();
        session.click(&definition.lease_number.link[0]).await.unwrap();
        session.submit(&definition.submit[0]).await.unwrap();

        let detector = detector();
        let inspection = detector.inspect(&session, &definition.results_checkpoint).await;
        assert_eq!(inspection.status, ChallengeStatus::Present);
        assert!(inspection.reason.contains("still present"));
        assert!(
            !detector
                .await_ready(&session, &definition.results_checkpoint, Duration::from_millis(10))
                .await
        );
    }

    #[tokio::test]
    async fn test_badge_ignored_outside_results() {
        let definition = PortalDefinition::default();
        let mut markers = definition.challenge.clone();
        markers.badges = vec![Locator::css("input[name='begFilPrd']")];
        let detector = ChallengeDetector::new(
            markers,
            &ChallengeConfig::default(),
            Duration::from_millis(10),
        );
        let session = FakePortal::session(PortalScript::results(""));
        session.navigate(&definition.landing_url).await.unwrap();
        session.click(&definition.lease_number.link[0]).await.unwrap();

        let search = detector.inspect(&session, &definition.search_checkpoint).await;
        assert_eq!(search.status, ChallengeStatus::Clear);

        let mut badged = definition.search_checkpoint.clone();
        badged.check_badges = true;
        let inspection = detector.inspect(&session, &badged).await;
        assert_eq!(inspection.status, ChallengeStatus::Present);
        assert!(inspection.reason.contains("challenge element"));
    }

    #[tokio::test]
    async fn test_blocking_text_is_present() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript {
            cookie_refusals: 1,
            ..PortalScript::results("")
        });
        session
            .navigate(definition.session_check_url.as_deref().unwrap())
            .await
            .unwrap();

        let inspection = detector()
            .inspect(&session, &definition.results_checkpoint)
            .await;
        assert_eq!(inspection.status, ChallengeStatus::Present);
        assert!(inspection.reason.contains("Cookies are required"));
    }

    #[tokio::test]
    async fn test_closed_session_is_unknown() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript::results(""));
        session.close().await.unwrap();

        let inspection = detector()
            .inspect(&session, &definition.results_checkpoint)
            .await;
        assert_eq!(inspection.status, ChallengeStatus::Unknown);
    }

    #[tokio::test]
    async fn test_repeated_unknown_counts_as_clear() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript::results(""));
        session.close().await.unwrap();

        let mut detections = 0;
        let outcome = detector()
            .settle(
                &session,
                &definition.results_checkpoint,
                &CancellationToken::new(),
                |_| detections += 1,
            )
            .await;
        assert_eq!(outcome, Ok(()));
        assert_eq!(detections, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_settle() {
        let definition = PortalDefinition::default();
        let session = FakePortal::session(PortalScript::results(""));
        session.navigate(&definition.landing_url).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = detector()
            .settle(&session, &definition.search_checkpoint, &cancel, |_| {})
            .await;
        assert_eq!(outcome, Err(SettleError::Cancelled));
    }
}
