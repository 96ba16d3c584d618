//! Leasedrop Retrieval - the retrieval pipeline on top of the portal.
//!
//! This crate turns a validated request into a [`QueryResult`]: it drives
//! the navigation state machine on a fresh browser session per attempt,
//! extracts rows from the results page, computes statistics, and retries
//! transient failures with exponential backoff.
//!
//! # Features
//!
//! - Bounded retries with per-kind retry policy
//! - Per-attempt wall-clock ceiling and cooperative cancellation
//! - Diagnostic snapshots for every failed attempt
//! - Optional history recording through [`HistoryStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! use leasedrop_retrieval::RetryController;
//! use tokio_util::sync::CancellationToken;
//!
//! let controller = RetryController::new(launcher, &config, definition, diagnostics_dir);
//! let result = controller.run(&request, &CancellationToken::new()).await;
//! println!("{}", serde_json::to_string_pretty(&result.payload())?);
//! ```
//!
//! [`QueryResult`]: leasedrop_core::QueryResult
//! [`HistoryStore`]: leasedrop_core::HistoryStore

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod stats;

// Re-export commonly used types
pub use error::{Result, RetrievalError};
pub use orchestrator::{complete, RetryController};
pub use parser::{parse_number, ResultExtractor, MARKER_PERIOD_COLUMN};
pub use stats::{percentage_change, statistics_table, summarize, trend, trend_report};
