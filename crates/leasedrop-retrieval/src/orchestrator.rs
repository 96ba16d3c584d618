//! Retrieval orchestrator with retry, backoff and diagnostics.
//!
//! [`RetryController`] owns the pipeline for one request: validation, then
//! up to `max_attempts` runs of *open session -> navigate -> extract ->
//! close*, each on a fresh session. It alone decides whether a failure is
//! retried:
//!
//! | Kind              | Policy                                          |
//! |-------------------|-------------------------------------------------|
//! | Validation        | fatal, no session opened                        |
//! | Browser           | fatal (session could not be launched)           |
//! | Parse             | fatal                                           |
//! | Navigation        | transient                                       |
//! | Interaction       | transient                                       |
//! | ChallengeBlocked  | transient                                       |
//! | ElementNotFound   | transient once, fatal if it recurs identically  |

use crate::parser::ResultExtractor;
use crate::stats;
use leasedrop_browser::{BrowserActions, SessionFactory};
use leasedrop_core::{
    AppConfig, Diagnostic, ErrorKind, Extraction, FailureReport, HistoryStore, PageState, Query,
    QueryInfo, QueryResult, QueryStatus, RetrievalRequest, RetryConfig,
};
use leasedrop_portal::{
    ChallengeDetector, DiagnosticRecorder, NavigationError, NavigationStateMachine,
    PortalDefinition,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How one attempt ended.
#[derive(Debug)]
enum AttemptOutcome {
    Extracted(Extraction),
    Failed {
        failure: FailureReport,
        diagnostic: Option<Diagnostic>,
    },
    Cancelled(PageState),
}

/// Runs retrievals with bounded retries over sessions from `F`.
pub struct RetryController<F: SessionFactory> {
    factory: F,
    definition: PortalDefinition,
    detector: ChallengeDetector,
    extractor: ResultExtractor,
    retry: RetryConfig,
    interactive_wait: Duration,
    recorder: DiagnosticRecorder,
    history: Option<Arc<dyn HistoryStore>>,
}

impl<F: SessionFactory> RetryController<F> {
    /// Create a controller from configuration and a portal definition.
    ///
    /// Diagnostics are written under `diagnostics_dir`.
    pub fn new(
        factory: F,
        config: &AppConfig,
        definition: PortalDefinition,
        diagnostics_dir: impl Into<PathBuf>,
    ) -> Self {
        let interactive_wait = config.browser.interactive_wait();
        Self {
            factory,
            detector: ChallengeDetector::new(
                definition.challenge.clone(),
                &config.challenge,
                interactive_wait,
            ),
            extractor: ResultExtractor::new(&definition.no_results_markers),
            definition,
            retry: config.retry.clone(),
            interactive_wait,
            recorder: DiagnosticRecorder::new(diagnostics_dir),
            history: None,
        }
    }

    /// Record every finished retrieval in `store`.
    #[must_use]
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Retrieve production data for one request.
    ///
    /// Never fails: every outcome, including validation errors and
    /// cancellation, is described by the returned result's status.
    pub async fn run(&self, request: &RetrievalRequest, cancel: &CancellationToken) -> QueryResult {
        let mut result = self.execute(request, cancel).await;

        if let Some(store) = &self.history {
            match store.append(&result).await {
                Ok(id) => {
                    info!(query_id = id, status = %result.status, "retrieval recorded");
                    result.query.id = Some(id);
                }
                Err(e) => error!("Failed to record retrieval history: {}", e),
            }
        }
        result
    }

    async fn execute(&self, request: &RetrievalRequest, cancel: &CancellationToken) -> QueryResult {
        let mut query = match Query::from_request(request) {
            Ok(query) => query,
            Err(e) => {
                warn!("Rejected retrieval request: {}", e);
                return QueryResult::unsuccessful(
                    QueryInfo::from_request(request, QueryStatus::Failed),
                    QueryStatus::Failed,
                    FailureReport::new(ErrorKind::Validation, e.to_string(), None),
                    Vec::new(),
                    0,
                );
            }
        };

        info!(
            identifier_type = %query.identifier_type(),
            identifier_value = %query.identifier_value(),
            beg_period = %query.beg_period(),
            end_period = %query.end_period(),
            "starting retrieval"
        );

        let max_attempts = self.retry.max_attempts.max(1);
        let mut diagnostics = Vec::new();
        let mut previous: Option<FailureReport> = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            if cancel.is_cancelled() {
                let state = previous
                    .as_ref()
                    .and_then(|f| f.state)
                    .unwrap_or(PageState::Init);
                return Self::finish(
                    &mut query,
                    QueryStatus::Cancelled,
                    FailureReport::cancelled(state),
                    diagnostics,
                    attempts,
                );
            }
            attempts += 1;
            info!(attempt = attempts, max_attempts, "attempt started");

            let failure = match self.attempt(&query, attempts, cancel).await {
                AttemptOutcome::Extracted(extraction) => {
                    query.finish(QueryStatus::Success);
                    info!(
                        attempt = attempts,
                        rows = extraction.rows.len(),
                        "retrieval succeeded"
                    );
                    return complete(query.info(), extraction, diagnostics, attempts);
                }
                AttemptOutcome::Cancelled(state) => {
                    info!(attempt = attempts, %state, "retrieval cancelled");
                    return Self::finish(
                        &mut query,
                        QueryStatus::Cancelled,
                        FailureReport::cancelled(state),
                        diagnostics,
                        attempts,
                    );
                }
                AttemptOutcome::Failed {
                    failure,
                    diagnostic,
                } => {
                    diagnostics.extend(diagnostic);
                    failure
                }
            };

            if is_fatal(&failure, previous.as_ref()) {
                error!(
                    attempt = attempts,
                    kind = ?failure.kind,
                    "retrieval failed permanently: {}",
                    failure.message
                );
                return Self::finish(&mut query, QueryStatus::Failed, failure, diagnostics, attempts);
            }

            if attempts < max_attempts {
                let delay = self.retry.backoff_for(attempts);
                warn!(
                    attempt = attempts,
                    max_attempts,
                    kind = ?failure.kind,
                    "attempt failed, retrying in {:?}: {}",
                    delay,
                    failure.message
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!(attempt = attempts, "retrieval cancelled during backoff");
                        let state = failure.state.unwrap_or(PageState::Init);
                        return Self::finish(
                            &mut query,
                            QueryStatus::Cancelled,
                            FailureReport::cancelled(state),
                            diagnostics,
                            attempts,
                        );
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            previous = Some(failure);
        }

        let failure = previous.unwrap_or_else(|| {
            FailureReport::new(ErrorKind::Navigation, "no attempt was made", None)
        });
        error!(
            attempts,
            kind = ?failure.kind,
            "retrieval failed after {} attempts: {}",
            attempts,
            failure.message
        );
        Self::finish(&mut query, QueryStatus::Failed, failure, diagnostics, attempts)
    }

    fn finish(
        query: &mut Query,
        status: QueryStatus,
        failure: FailureReport,
        diagnostics: Vec<Diagnostic>,
        attempts: u32,
    ) -> QueryResult {
        query.finish(status);
        QueryResult::unsuccessful(query.info(), status, failure, diagnostics, attempts)
    }

    /// One pipeline run on a fresh session, which is always closed.
    async fn attempt(&self, query: &Query, attempt: u32, cancel: &CancellationToken) -> AttemptOutcome {
        let session = match self.factory.open().await {
            Ok(session) => session,
            Err(e) => {
                let failure = FailureReport::new(
                    ErrorKind::Browser,
                    format!("browser session could not be launched: {e}"),
                    Some(PageState::Init),
                );
                let diagnostic = match self
                    .recorder
                    .record_context(attempt, PageState::Init, &failure.message)
                    .await
                {
                    Ok(diagnostic) => Some(diagnostic),
                    Err(e) => {
                        warn!("Failed to write diagnostic: {}", e);
                        None
                    }
                };
                return AttemptOutcome::Failed {
                    failure,
                    diagnostic,
                };
            }
        };

        let outcome = self.drive(&session, query, attempt, cancel).await;
        if let Err(e) = session.close().await {
            warn!("Session close failed: {}", e);
        }
        outcome
    }

    async fn drive(
        &self,
        session: &F::Session,
        query: &Query,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let machine =
            NavigationStateMachine::new(session, &self.definition, &self.detector, self.interactive_wait);
        let state = machine.subscribe();
        let ceiling = self.retry.attempt_timeout();

        let failure = match tokio::time::timeout(ceiling, machine.run(query, cancel)).await {
            Ok(Ok(html)) => match self.extractor.extract(&html) {
                Ok(extraction) => return AttemptOutcome::Extracted(extraction),
                Err(e) => FailureReport::new(e.kind(), e.to_string(), Some(PageState::ResultsReady)),
            },
            Ok(Err(NavigationError::Cancelled { state })) => return AttemptOutcome::Cancelled(state),
            Ok(Err(NavigationError::Failed {
                kind,
                state,
                message,
            })) => FailureReport::new(kind, message, Some(state)),
            Err(_) => {
                let at = *state.borrow();
                FailureReport::new(
                    ErrorKind::Navigation,
                    format!("attempt exceeded {}s ceiling at {at}", ceiling.as_secs()),
                    Some(at),
                )
            }
        };

        let diagnostic = self.capture(session, attempt, &failure).await;
        AttemptOutcome::Failed {
            failure,
            diagnostic,
        }
    }

    async fn capture(
        &self,
        session: &F::Session,
        attempt: u32,
        failure: &FailureReport,
    ) -> Option<Diagnostic> {
        let state = failure.state.unwrap_or(PageState::Init);
        let reason = match failure.kind {
            Some(kind) => format!("{kind}: {}", failure.message),
            None => failure.message.clone(),
        };
        match self.recorder.record(session, attempt, state, &reason).await {
            Ok(diagnostic) => Some(diagnostic),
            Err(e) => {
                warn!("Failed to write diagnostic: {}", e);
                None
            }
        }
    }
}

/// Whether `failure` ends the retrieval without further attempts.
fn is_fatal(failure: &FailureReport, previous: Option<&FailureReport>) -> bool {
    match failure.kind {
        Some(ErrorKind::Validation | ErrorKind::Parse | ErrorKind::Browser) | None => true,
        Some(ErrorKind::ElementNotFound) => previous == Some(failure),
        Some(ErrorKind::Navigation | ErrorKind::Interaction | ErrorKind::ChallengeBlocked) => false,
    }
}

/// Assemble a successful result from extracted rows.
#[must_use]
pub fn complete(
    query: QueryInfo,
    extraction: Extraction,
    diagnostics: Vec<Diagnostic>,
    attempts: u32,
) -> QueryResult {
    let values = extraction.production_values();
    let has_columns = !extraction.production_column.is_empty();

    QueryResult {
        status: query.status,
        query,
        production_column: has_columns.then(|| extraction.production_column.clone()),
        date_column: (!extraction.date_column.is_empty()).then(|| extraction.date_column.clone()),
        statistics: stats::summarize(&values),
        percentage_change: stats::percentage_change(&values),
        percentage_change_note: stats::percentage_change_note(&values),
        trend: stats::trend(&values),
        rows: extraction.rows,
        diagnostics,
        error: None,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(state: PageState, message: &str) -> FailureReport {
        FailureReport::new(ErrorKind::ElementNotFound, message, Some(state))
    }

    #[test]
    fn test_fatal_kinds() {
        for kind in [ErrorKind::Validation, ErrorKind::Parse, ErrorKind::Browser] {
            assert!(is_fatal(&FailureReport::new(kind, "x", None), None));
        }
        for kind in [
            ErrorKind::Navigation,
            ErrorKind::Interaction,
            ErrorKind::ChallengeBlocked,
        ] {
            let failure = FailureReport::new(kind, "x", None);
            assert!(!is_fatal(&failure, Some(&failure)));
        }
    }

    #[test]
    fn test_element_not_found_fatal_only_on_identical_recurrence() {
        let first = not_found(PageState::MainPageLoaded, "link `Lease Drop`");
        assert!(!is_fatal(&first, None));
        assert!(is_fatal(&first.clone(), Some(&first)));

        let elsewhere = not_found(PageState::SearchPageReady, "css `#leaseNum`");
        assert!(!is_fatal(&elsewhere, Some(&first)));

        let navigation = FailureReport::new(ErrorKind::Navigation, "timeout", None);
        assert!(!is_fatal(&first, Some(&navigation)));
    }

    #[test]
    fn test_complete_with_no_rows() {
        let request = RetrievalRequest::new(
            leasedrop_core::IdentifierType::LeaseNumber,
            "011457",
            "1601",
            "2001",
        );
        let result = complete(
            QueryInfo::from_request(&request, QueryStatus::Success),
            Extraction::empty(),
            Vec::new(),
            1,
        );
        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.statistics.count, 0);
        assert!(result.production_column.is_none());
        assert!(result.percentage_change.is_none());
        assert!(result.percentage_change_note.is_some());
    }
}
