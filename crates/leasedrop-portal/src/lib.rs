//! Leasedrop Portal - driving the Comptroller portal to its results page.
//!
//! # Architecture
//!
//! - **Definition** ([`definition`]): URLs, locators and marker texts, with TOML overrides
//! - **Challenge** ([`challenge`]): Anti-automation detection and settle-wait policy
//! - **Navigation** ([`navigation`]): Page state machine for one attempt
//! - **Diagnostics** ([`diagnostics`]): Screenshot and context files on failure
//! - **Errors** ([`error`]): Portal and navigation error types
//! - **Testing** (`testing`, feature `testing`): Scripted in-memory portal
//!
//! # Example
//!
//! ```rust
//! use leasedrop_portal::PortalDefinition;
//! use leasedrop_core::IdentifierType;
//!
//! let definition = PortalDefinition::default();
//! let route = definition.route(IdentifierType::DrillingPermitNumber);
//! assert!(!route.field.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod challenge;
pub mod definition;
pub mod diagnostics;
pub mod error;
pub mod navigation;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use challenge::{ChallengeDetector, ChallengeStatus, Inspection, SettleError};
pub use definition::{ChallengeMarkers, Checkpoint, IdentifierRoute, PortalDefinition};
pub use diagnostics::DiagnosticRecorder;
pub use error::{classify, NavigationError, PortalError, Result};
pub use navigation::NavigationStateMachine;
