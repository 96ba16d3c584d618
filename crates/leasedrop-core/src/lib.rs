//! Leasedrop Core - shared types for lease production retrieval.
//!
//! This crate holds the request and result model, configuration, and the
//! history store seam that the browser, portal, retrieval and database
//! crates build on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with env overrides
//! - [`query`] - Validated retrieval requests
//! - [`result`] - Page states, error kinds, extracted rows and payloads
//! - [`history`] - History store trait
//!
//! # Example
//!
//! ```rust
//! use leasedrop_core::{IdentifierType, Query, RetrievalRequest};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = RetrievalRequest::new(IdentifierType::LeaseNumber, "011457", "1601", "2001");
//! let query = Query::from_request(&request)?;
//! assert_eq!(query.identifier_value().as_str(), "011457");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod history;
pub mod query;
pub mod result;

// Re-export commonly used types
pub use config::{AppConfig, BrowserConfig, ChallengeConfig, RetryConfig, StorageConfig};
pub use error::{ConfigError, ConfigResult, LeaseDropError, Result};
pub use history::HistoryStore;
pub use query::{
    IdentifierType, IdentifierValue, Period, Query, QueryInfo, QueryStatus, RetrievalRequest,
};
pub use result::{
    Diagnostic, ErrorKind, Extraction, FailureReport, PageState, QueryResult, ResponsePayload,
    ResultRow, StatisticRow, Statistics, Trend, TrendDirection, TrendPoint, TrendReport,
};
