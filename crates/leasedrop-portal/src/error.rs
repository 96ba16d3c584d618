//! Error types for the portal subsystem.

use leasedrop_browser::BrowserError;
use leasedrop_core::{ErrorKind, PageState};
use thiserror::Error;

/// Errors loading or validating a portal definition, or writing diagnostics.
#[derive(Error, Debug)]
pub enum PortalError {
    /// Failed to parse portal definition TOML
    #[error("failed to parse portal definition TOML in {path}: {source}")]
    ParseError {
        /// Path to the definition file
        path: String,
        /// TOML parse error
        #[source]
        source: toml::de::Error,
    },

    /// Invalid portal definition (validation failed)
    #[error("invalid portal definition {name}: {reason}")]
    ValidationError {
        /// Portal name
        name: String,
        /// Reason for validation failure
        reason: String,
    },

    /// I/O error while reading definitions or writing diagnostics
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;

/// Why a navigation run stopped short of the results page.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    /// A step failed; `state` is where the machine stood when it did
    #[error("{kind} at {state}: {message}")]
    Failed {
        /// Failure class
        kind: ErrorKind,
        /// Page state at failure
        state: PageState,
        /// Human-readable explanation
        message: String,
    },

    /// Cancellation was observed between transitions
    #[error("cancelled at {state}")]
    Cancelled {
        /// Page state when cancellation was observed
        state: PageState,
    },
}

impl NavigationError {
    /// Build a failure of the given kind.
    pub fn failed(kind: ErrorKind, state: PageState, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            state,
            message: message.into(),
        }
    }

    /// Wrap a browser error raised while in `state`.
    #[must_use]
    pub fn from_browser(err: &BrowserError, state: PageState) -> Self {
        Self::failed(classify(err), state, err.to_string())
    }

    /// Page state at which the run stopped.
    #[must_use]
    pub fn state(&self) -> PageState {
        match self {
            Self::Failed { state, .. } | Self::Cancelled { state } => *state,
        }
    }

    /// Failure class, `None` for cancellation.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Map a browser error onto the caller-facing failure class.
#[must_use]
pub fn classify(err: &BrowserError) -> ErrorKind {
    match err {
        BrowserError::Launch(_) => ErrorKind::Browser,
        BrowserError::Navigation(_) | BrowserError::Timeout(_) => ErrorKind::Navigation,
        BrowserError::ElementNotFound(_) => ErrorKind::ElementNotFound,
        BrowserError::Interaction(_) | BrowserError::Chromium(_) | BrowserError::Closed => {
            ErrorKind::Interaction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_browser_errors() {
        assert_eq!(
            classify(&BrowserError::Launch("no chrome".into())),
            ErrorKind::Browser
        );
        assert_eq!(
            classify(&BrowserError::Timeout("slow".into())),
            ErrorKind::Navigation
        );
        assert_eq!(
            classify(&BrowserError::ElementNotFound("#DPN".into())),
            ErrorKind::ElementNotFound
        );
        assert_eq!(classify(&BrowserError::Closed), ErrorKind::Interaction);
    }

    #[test]
    fn test_navigation_error_carries_state() {
        let err = NavigationError::from_browser(
            &BrowserError::Navigation("dns".into()),
            PageState::Init,
        );
        assert_eq!(err.state(), PageState::Init);
        assert_eq!(err.kind(), Some(ErrorKind::Navigation));
        assert_eq!(err.to_string(), "NavigationError at Init: navigation failed: dns");

        let err = NavigationError::Cancelled {
            state: PageState::LinkClicked,
        };
        assert_eq!(err.kind(), None);
    }
}
