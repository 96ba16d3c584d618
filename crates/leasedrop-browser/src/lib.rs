//! Browser sessions for portal automation.
//!
//! A [`BrowserSession`] owns one Chromium instance with exactly one page and
//! exposes the [`BrowserActions`] primitives the navigation pipeline needs.
//! Sessions come from a [`SessionFactory`] so the pipeline can be driven by
//! a scripted fake in tests.

pub mod actions;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod locator;
pub mod wait;

pub use actions::{BrowserActions, SessionFactory, Snapshot};
pub use engine::{BrowserSession, ChromiumLauncher};
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use locator::Locator;
pub use wait::poll_until;
