//! Result types produced by a retrieval run.
//!
//! Everything a caller or the history store receives is an explicit tagged
//! type: [`QueryStatus`](crate::QueryStatus) for the outcome, [`ErrorKind`]
//! for the failure class, [`PageState`] for where navigation stopped.

use crate::query::{QueryInfo, QueryStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input; never retried
    #[serde(rename = "ValidationError")]
    Validation,
    /// Page failed to load or settle
    #[serde(rename = "NavigationError")]
    Navigation,
    /// Expected element missing within its timeout
    #[serde(rename = "ElementNotFoundError")]
    ElementNotFound,
    /// Anti-automation challenge did not clear
    #[serde(rename = "ChallengeBlockedError")]
    ChallengeBlocked,
    /// Element went stale mid-interaction
    #[serde(rename = "InteractionError")]
    Interaction,
    /// Results page structure unrecognized
    #[serde(rename = "ParseError")]
    Parse,
    /// Browser could not be launched
    #[serde(rename = "BrowserError")]
    Browser,
}

impl ErrorKind {
    /// Stable name used in payloads and the history store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Navigation => "NavigationError",
            Self::ElementNotFound => "ElementNotFoundError",
            Self::ChallengeBlocked => "ChallengeBlockedError",
            Self::Interaction => "InteractionError",
            Self::Parse => "ParseError",
            Self::Browser => "BrowserError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Navigation stage of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageState {
    /// Session open, nothing loaded
    Init,
    /// Landing page loaded and session established
    MainPageLoaded,
    /// Category link clicked
    LinkClicked,
    /// Search form present and usable
    SearchPageReady,
    /// Search form submitted
    FormSubmitted,
    /// Results page settled
    ResultsReady,
    /// Waiting out an anti-automation challenge
    ChallengeDetected,
    /// Terminal failure
    Error(ErrorKind),
}

impl PageState {
    /// Whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResultsReady | Self::Error(_))
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("Init"),
            Self::MainPageLoaded => f.write_str("MainPageLoaded"),
            Self::LinkClicked => f.write_str("LinkClicked"),
            Self::SearchPageReady => f.write_str("SearchPageReady"),
            Self::FormSubmitted => f.write_str("FormSubmitted"),
            Self::ResultsReady => f.write_str("ResultsReady"),
            Self::ChallengeDetected => f.write_str("ChallengeDetected"),
            Self::Error(kind) => write!(f, "Error({kind})"),
        }
    }
}

/// One extracted row: a period label and its numeric fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Period or date label as shown by the source
    pub period: String,
    /// Numeric fields keyed by source column header
    pub values: BTreeMap<String, f64>,
}

impl ResultRow {
    /// Create a row with a single named value.
    #[must_use]
    pub fn new(period: impl Into<String>, column: impl Into<String>, value: f64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(column.into(), value);
        Self {
            period: period.into(),
            values,
        }
    }

    /// Value of a named column, if present.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

/// Normalized content of a results page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Header of the primary production column
    pub production_column: String,
    /// Header (or synthesized name) of the period column
    pub date_column: String,
    /// Rows in source order
    pub rows: Vec<ResultRow>,
}

impl Extraction {
    /// A valid result with no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            production_column: String::new(),
            date_column: String::new(),
            rows: Vec::new(),
        }
    }

    /// Primary production values in row order.
    #[must_use]
    pub fn production_values(&self) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.value(&self.production_column))
            .collect()
    }
}

/// Summary statistics over the primary production column.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// Number of values
    pub count: usize,
    /// Arithmetic mean
    pub mean: Option<f64>,
    /// Median
    pub median: Option<f64>,
    /// Minimum
    pub min: Option<f64>,
    /// Maximum
    pub max: Option<f64>,
    /// Sample standard deviation (n - 1)
    pub stddev: Option<f64>,
}

impl Statistics {
    /// Tabular form: `Count, Mean, Median, Min, Max, Std Dev`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_table(&self) -> Vec<StatisticRow> {
        [
            ("Count", Some(self.count as f64)),
            ("Mean", self.mean),
            ("Median", self.median),
            ("Min", self.min),
            ("Max", self.max),
            ("Std Dev", self.stddev),
        ]
        .into_iter()
        .map(|(name, value)| StatisticRow {
            statistic: name.to_string(),
            value,
        })
        .collect()
    }
}

/// One `{Statistic, Value}` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRow {
    /// Statistic name
    #[serde(rename = "Statistic")]
    pub statistic: String,
    /// Value, null when undefined
    #[serde(rename = "Value")]
    pub value: Option<f64>,
}

/// Direction of a fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    /// Positive slope
    Increasing,
    /// Negative slope
    Decreasing,
    /// Slope within epsilon of zero
    Flat,
}

/// Linear-regression fit of value against chronological index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Increasing, decreasing or flat
    pub direction: TrendDirection,
    /// Absolute correlation coefficient
    pub strength: f64,
    /// Fitted slope per period
    pub slope: f64,
    /// Fitted intercept at index 0
    pub intercept: f64,
    /// Pearson correlation coefficient
    pub r_value: f64,
}

/// Per-row derived series for trend analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct TrendPoint {
    pub period: String,
    pub value: f64,
    pub previous: Option<f64>,
    pub monthly_change: Option<f64>,
    pub monthly_pct_change: Option<f64>,
    pub cumulative_change: f64,
    pub cumulative_pct_change: Option<f64>,
    pub moving_avg_3: Option<f64>,
    pub moving_avg_6: Option<f64>,
}

/// Full trend analysis of one stored query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct TrendReport {
    pub production_column: String,
    pub date_column: String,
    pub trend: Option<Trend>,
    pub points: Vec<TrendPoint>,
}

/// A snapshot captured on failure or challenge detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Navigation stage at capture
    pub state: PageState,
    /// Why the snapshot was taken
    pub reason: String,
    /// PNG screenshot, when the page could still render one
    pub screenshot_path: Option<PathBuf>,
    /// Text context file (URL, title, state, reason, HTML)
    pub context_path: PathBuf,
}

impl Diagnostic {
    /// Primary reference for callers: the screenshot if any, else the context file.
    #[must_use]
    pub fn reference(&self) -> String {
        self.screenshot_path
            .as_ref()
            .unwrap_or(&self.context_path)
            .display()
            .to_string()
    }
}

/// Failure details carried by an unsuccessful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Failure class; absent for cancellation
    #[serde(default)]
    pub kind: Option<ErrorKind>,
    /// Human-readable explanation
    pub message: String,
    /// Navigation stage when the failure happened
    pub state: Option<PageState>,
}

impl FailureReport {
    /// A classified failure.
    pub fn new(kind: ErrorKind, message: impl Into<String>, state: Option<PageState>) -> Self {
        Self {
            kind: Some(kind),
            message: message.into(),
            state,
        }
    }

    /// Cancellation observed at `state`.
    #[must_use]
    pub fn cancelled(state: PageState) -> Self {
        Self {
            kind: None,
            message: format!("cancelled at {state}"),
            state: Some(state),
        }
    }
}

/// Everything one retrieval produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Query summary with final status
    pub query: QueryInfo,
    /// Final status
    pub status: QueryStatus,
    /// Production column header, when rows were extracted
    pub production_column: Option<String>,
    /// Period column header, when rows were extracted
    pub date_column: Option<String>,
    /// Extracted rows in source order
    pub rows: Vec<ResultRow>,
    /// Summary statistics
    pub statistics: Statistics,
    /// `(last - first) / first * 100`, when defined
    pub percentage_change: Option<f64>,
    /// Why `percentage_change` is null, when it is
    pub percentage_change_note: Option<String>,
    /// Regression trend, when at least two values exist
    pub trend: Option<Trend>,
    /// Diagnostics captured across all attempts
    pub diagnostics: Vec<Diagnostic>,
    /// Failure details for failed or cancelled results
    pub error: Option<FailureReport>,
    /// Pipeline runs performed
    pub attempts: u32,
}

impl QueryResult {
    /// A result that ended before or without extraction.
    #[must_use]
    pub fn unsuccessful(
        mut query: QueryInfo,
        status: QueryStatus,
        error: FailureReport,
        diagnostics: Vec<Diagnostic>,
        attempts: u32,
    ) -> Self {
        query.status = status;
        Self {
            query,
            status,
            production_column: None,
            date_column: None,
            rows: Vec::new(),
            statistics: Statistics::default(),
            percentage_change: None,
            percentage_change_note: None,
            trend: None,
            diagnostics,
            error: Some(error),
            attempts,
        }
    }

    /// Caller-facing response payload.
    #[must_use]
    pub fn payload(&self) -> ResponsePayload {
        ResponsePayload {
            status: self.status,
            query_info: self.query.clone(),
            production_column: self.production_column.clone(),
            date_column: self.date_column.clone(),
            percentage_change: self.percentage_change,
            statistics: self.statistics.to_table(),
            data: self.rows.clone(),
            trend: self.trend,
            message: self
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .or_else(|| self.percentage_change_note.clone()),
            error_kind: self.error.as_ref().and_then(|e| e.kind),
            diagnostics: self.diagnostics.iter().map(Diagnostic::reference).collect(),
        }
    }
}

/// Response shape produced for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ResponsePayload {
    pub status: QueryStatus,
    pub query_info: QueryInfo,
    pub production_column: Option<String>,
    pub date_column: Option<String>,
    pub percentage_change: Option<f64>,
    pub statistics: Vec<StatisticRow>,
    pub data: Vec<ResultRow>,
    pub trend: Option<Trend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub diagnostics: Vec<String>,
}
