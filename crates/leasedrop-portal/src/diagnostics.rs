//! Diagnostic snapshots written to disk on failure.

use crate::error::Result;
use chrono::Utc;
use leasedrop_browser::{BrowserActions, Snapshot};
use leasedrop_core::{Diagnostic, PageState};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes screenshot and context files for failed attempts.
#[derive(Debug, Clone)]
pub struct DiagnosticRecorder {
    dir: PathBuf,
}

impl DiagnosticRecorder {
    /// Recorder writing into `dir`, created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the live session and write its snapshot.
    ///
    /// A failed capture still produces a context file naming the failure.
    pub async fn record<S>(
        &self,
        session: &S,
        attempt: u32,
        state: PageState,
        reason: &str,
    ) -> Result<Diagnostic>
    where
        S: BrowserActions + ?Sized,
    {
        match session.capture().await {
            Ok(snapshot) => self.write(attempt, state, reason, Some(&snapshot), None).await,
            Err(e) => {
                warn!("Diagnostic capture failed: {}", e);
                self.write(attempt, state, reason, None, Some(&e.to_string()))
                    .await
            }
        }
    }

    /// Write a context-only diagnostic when no session is available.
    pub async fn record_context(
        &self,
        attempt: u32,
        state: PageState,
        reason: &str,
    ) -> Result<Diagnostic> {
        self.write(attempt, state, reason, None, None).await
    }

    async fn write(
        &self,
        attempt: u32,
        state: PageState,
        reason: &str,
        snapshot: Option<&Snapshot>,
        capture_error: Option<&str>,
    ) -> Result<Diagnostic> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let captured_at = Utc::now();
        let stem = format!(
            "{}_attempt{attempt}_{}",
            captured_at.format("%Y%m%dT%H%M%S%.3f"),
            state_slug(state)
        );

        let screenshot_path = match snapshot.and_then(|s| s.png.as_deref()) {
            Some(png) => {
                let path = self.dir.join(format!("{stem}.png"));
                tokio::fs::write(&path, png).await?;
                Some(path)
            }
            None => None,
        };

        let mut context = String::new();
        let _ = writeln!(context, "captured_at: {}", captured_at.to_rfc3339());
        let _ = writeln!(context, "attempt: {attempt}");
        let _ = writeln!(context, "state: {state}");
        let _ = writeln!(context, "reason: {reason}");
        if let Some(error) = capture_error {
            let _ = writeln!(context, "capture_error: {error}");
        }
        if let Some(snapshot) = snapshot {
            let _ = writeln!(context, "url: {}", snapshot.url);
            let _ = writeln!(context, "title: {}", snapshot.title);
            let _ = writeln!(context, "\n--- html ---\n{}", snapshot.html);
        }

        let context_path = self.dir.join(format!("{stem}.txt"));
        tokio::fs::write(&context_path, context).await?;
        info!(path = %context_path.display(), "diagnostic recorded");

        Ok(Diagnostic {
            captured_at,
            attempt,
            state,
            reason: reason.to_string(),
            screenshot_path,
            context_path,
        })
    }
}

fn state_slug(state: PageState) -> String {
    match state {
        PageState::Error(kind) => format!("error-{}", kind.as_str().to_lowercase()),
        other => other.to_string().to_lowercase(),
    }
}
