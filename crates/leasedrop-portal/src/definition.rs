//! Portal definition: URLs, locators and marker texts for one portal.
//!
//! The built-in definition targets the Texas Comptroller "Lease Drop - Crude
//! Oil" report. Any field may be overridden from a TOML file; omitted fields
//! keep their built-in values.

use crate::error::{PortalError, Result};
use leasedrop_browser::Locator;
use leasedrop_core::IdentifierType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Complete description of the portal the state machine drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalDefinition {
    /// Human-readable portal name
    pub name: String,

    /// Landing page establishing the session
    pub landing_url: String,

    /// Cookie/session check page visited after the landing page
    pub session_check_url: Option<String>,

    /// Script run on the landing page to flag cookie support
    pub cookie_flag_script: Option<String>,

    /// Text on the check page meaning cookies were refused
    pub cookie_refusal_text: String,

    /// Landing/check revisits before a cookie failure is final
    pub cookie_recovery_attempts: u32,

    /// Route for lease-number queries
    pub lease_number: IdentifierRoute,

    /// Route for drilling-permit queries
    pub drilling_permit_number: IdentifierRoute,

    /// Candidate locators for the beginning period field
    pub beg_period_field: Vec<Locator>,

    /// Candidate locators for the ending period field
    pub end_period_field: Vec<Locator>,

    /// Candidate locators for the submit control
    pub submit: Vec<Locator>,

    /// Anti-automation markers
    pub challenge: ChallengeMarkers,

    /// What the search form page looks like once usable
    pub search_checkpoint: Checkpoint,

    /// What the results page looks like once settled
    pub results_checkpoint: Checkpoint,

    /// Texts meaning the query matched nothing
    pub no_results_markers: Vec<String>,
}

/// Link to click and field to fill for one identifier type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierRoute {
    /// Candidate locators for the category link
    pub link: Vec<Locator>,
    /// Candidate locators for the identifier input
    pub field: Vec<Locator>,
}

/// Signals that an anti-automation challenge is in the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeMarkers {
    /// Challenge frame elements, checked at every checkpoint
    pub selectors: Vec<Locator>,
    /// Badge elements, checked only at checkpoints with `check_badges`.
    ///
    /// Invisible reCAPTCHA leaves its badge on every page that loads it,
    /// so a badge only means something where the page should not carry one.
    pub badges: Vec<Locator>,
    /// Page texts that block progress
    pub blocking_texts: Vec<String>,
}

/// Expected shape of a page after a risky transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    /// Label used in logs and diagnostics
    pub name: String,
    /// Fragment the URL must contain (either this or `title_contains` must match)
    pub url_fragment: Option<String>,
    /// Text the title must contain
    pub title_contains: Option<String>,
    /// Elements of which at least one must be present
    pub ready: Vec<Locator>,
    /// Texts that also count as ready when present
    pub ready_texts: Vec<String>,
    /// Elements of the previous page that must be gone
    pub gone: Vec<Locator>,
    /// Whether challenge badges count as a challenge here
    pub check_badges: bool,
}

impl Checkpoint {
    /// Whether the URL/title expectation is configured.
    #[must_use]
    pub fn has_location(&self) -> bool {
        self.url_fragment.is_some() || self.title_contains.is_some()
    }

    /// Whether the page is where this checkpoint expects it to be.
    #[must_use]
    pub fn location_matches(&self, url: &str, title: &str) -> bool {
        if !self.has_location() {
            return true;
        }
        let url_ok = self
            .url_fragment
            .as_deref()
            .is_some_and(|fragment| url.contains(fragment));
        let title_ok = self
            .title_contains
            .as_deref()
            .is_some_and(|expected| title.contains(expected));
        url_ok || title_ok
    }
}

impl PortalDefinition {
    /// Built-in definition for the Texas Comptroller portal.
    #[must_use]
    pub fn texas_comptroller() -> Self {
        let category_link = vec![
            Locator::link_text("Lease Drop-Crude Oil"),
            Locator::link_text("Lease Drop - Crude Oil"),
        ];

        Self {
            name: "Texas Comptroller Lease Drop - Crude Oil".to_string(),
            landing_url: "https://mycpa.cpa.state.tx.us/cong/Index.jsp".to_string(),
            session_check_url: Some(
                "https://mycpa.cpa.state.tx.us/cong/loginForward.do?phase=check".to_string(),
            ),
            cookie_flag_script: Some("document.cookie='cookiesEnabled=true; path=/;'".to_string()),
            cookie_refusal_text: "Cookies are required".to_string(),
            cookie_recovery_attempts: 3,
            lease_number: IdentifierRoute {
                link: category_link.clone(),
                field: vec![
                    Locator::css("input[name='leaseNum']"),
                    Locator::css("#leaseNum"),
                    Locator::xpath("//input[contains(@name, 'lease')]"),
                    Locator::xpath("//label[contains(text(), 'Lease')]/following::input[1]"),
                ],
            },
            drilling_permit_number: IdentifierRoute {
                link: category_link,
                field: vec![
                    Locator::css("input[name='DPN']"),
                    Locator::css("#DPN"),
                    Locator::xpath("//input[contains(@name, 'DPN')]"),
                    Locator::xpath("//input[contains(@id, 'DPN')]"),
                    Locator::xpath("//label[contains(text(), 'Permit')]/following::input[1]"),
                ],
            },
            beg_period_field: vec![
                Locator::css("input[name='begFilPrd']"),
                Locator::css("#begFilPrd"),
                Locator::xpath("//input[contains(@name, 'beg')]"),
                Locator::xpath("//label[contains(text(), 'Beg')]/following::input[1]"),
            ],
            end_period_field: vec![
                Locator::css("input[name='endFilPrd']"),
                Locator::css("#endFilPrd"),
                Locator::xpath("//input[contains(@name, 'end')]"),
                Locator::xpath("//label[contains(text(), 'End')]/following::input[1]"),
            ],
            submit: vec![
                Locator::xpath("//input[@type='submit'][contains(@value, 'Submit')]"),
                Locator::xpath("//button[contains(text(), 'Submit')]"),
                Locator::xpath("//input[@type='button'][contains(@value, 'Submit')]"),
                Locator::xpath("//a[contains(text(), 'Submit')]"),
                Locator::css("input[type='submit']"),
                Locator::css("button[type='submit']"),
            ],
            challenge: ChallengeMarkers::default(),
            search_checkpoint: Checkpoint {
                name: "search".to_string(),
                url_fragment: Some("reportLeaseDropCO".to_string()),
                title_contains: Some("Lease Drop - Crude Oil".to_string()),
                ready: vec![
                    Locator::css("input[name='begFilPrd']"),
                    Locator::xpath("//input[contains(@name, 'beg')]"),
                ],
                ready_texts: Vec::new(),
                gone: Vec::new(),
                check_badges: false,
            },
            results_checkpoint: Checkpoint {
                name: "results".to_string(),
                url_fragment: None,
                title_contains: None,
                ready: vec![
                    Locator::xpath("//table[.//th][not(.//input)]"),
                    Locator::xpath("//table//td[contains(., 'Period:')]"),
                ],
                ready_texts: vec![
                    "No records found".to_string(),
                    "No data found".to_string(),
                    "no records".to_string(),
                ],
                gone: vec![
                    Locator::css("input[name='begFilPrd']"),
                    Locator::css("input[name='endFilPrd']"),
                ],
                check_badges: true,
            },
            no_results_markers: vec![
                "No records found".to_string(),
                "No data found".to_string(),
                "no records".to_string(),
                "There is no data".to_string(),
            ],
        }
    }

    /// Load a definition from TOML, falling back to built-in values for
    /// omitted fields.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let definition: Self =
            toml::from_str(&contents).map_err(|source| PortalError::ParseError {
                path: path.display().to_string(),
                source,
            })?;
        definition.validate()?;
        debug!(name = %definition.name, path = %path.display(), "loaded portal definition");
        Ok(definition)
    }

    /// Built-in definition, or the one at `path` when given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Route for an identifier type.
    #[must_use]
    pub fn route(&self, identifier_type: IdentifierType) -> &IdentifierRoute {
        match identifier_type {
            IdentifierType::LeaseNumber => &self.lease_number,
            IdentifierType::DrillingPermitNumber => &self.drilling_permit_number,
        }
    }

    /// Validate the definition for completeness.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| PortalError::ValidationError {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.landing_url.is_empty() {
            return Err(invalid("landing_url cannot be empty"));
        }
        for (label, route) in [
            ("lease_number", &self.lease_number),
            ("drilling_permit_number", &self.drilling_permit_number),
        ] {
            if route.link.is_empty() {
                return Err(invalid(&format!("{label}.link needs at least one locator")));
            }
            if route.field.is_empty() {
                return Err(invalid(&format!("{label}.field needs at least one locator")));
            }
        }
        if self.beg_period_field.is_empty() || self.end_period_field.is_empty() {
            return Err(invalid("period fields need at least one locator each"));
        }
        if self.submit.is_empty() {
            return Err(invalid("submit needs at least one locator"));
        }
        for checkpoint in [&self.search_checkpoint, &self.results_checkpoint] {
            if checkpoint.ready.is_empty() && checkpoint.ready_texts.is_empty() {
                return Err(invalid(&format!(
                    "checkpoint {} needs ready elements or texts",
                    checkpoint.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for PortalDefinition {
    fn default() -> Self {
        Self::texas_comptroller()
    }
}

impl Default for ChallengeMarkers {
    fn default() -> Self {
        Self {
            selectors: vec![
                Locator::css("iframe[src*='recaptcha/api2/bframe']"),
                Locator::css("iframe[title*='challenge']"),
                Locator::css("#challenge-form"),
            ],
            badges: vec![Locator::css(".grecaptcha-badge")],
            blocking_texts: vec![
                "Cookies are required".to_string(),
                "session has expired".to_string(),
                "verify you are human".to_string(),
            ],
        }
    }
}

impl Default for IdentifierRoute {
    fn default() -> Self {
        PortalDefinition::texas_comptroller().lease_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_definition_is_valid() {
        let def = PortalDefinition::default();
        assert!(def.validate().is_ok());
        assert_eq!(def.landing_url, "https://mycpa.cpa.state.tx.us/cong/Index.jsp");
    }

    #[test]
    fn test_routes_share_link_but_not_field() {
        let def = PortalDefinition::default();
        let lease = def.route(IdentifierType::LeaseNumber);
        let permit = def.route(IdentifierType::DrillingPermitNumber);
        assert_eq!(lease.link, permit.link);
        assert_eq!(lease.field[0], Locator::css("input[name='leaseNum']"));
        assert_eq!(permit.field[0], Locator::css("input[name='DPN']"));
    }

    #[test]
    fn test_checkpoint_location_any_of() {
        let def = PortalDefinition::default();
        let search = &def.search_checkpoint;
        assert!(search.location_matches(
            "https://mycpa.cpa.state.tx.us/cong/reportLeaseDropCOForward.do",
            ""
        ));
        assert!(search.location_matches("https://x/other", "Lease Drop - Crude Oil"));
        assert!(!search.location_matches("https://x/Index.jsp", "Welcome"));
        assert!(def.results_checkpoint.location_matches("anything", ""));
    }

    #[test]
    fn test_badges_scoped_to_results() {
        let def = PortalDefinition::default();
        assert!(!def.search_checkpoint.check_badges);
        assert!(def.results_checkpoint.check_badges);
        assert!(!def.challenge.selectors.contains(&Locator::css(".grecaptcha-badge")));
        assert_eq!(def.challenge.badges, vec![Locator::css(".grecaptcha-badge")]);
    }

    #[test]
    fn test_results_checkpoint_requires_search_form_gone() {
        let def = PortalDefinition::default();
        let results = &def.results_checkpoint;
        assert!(results.gone.contains(&def.beg_period_field[0]));
        assert!(!results.ready.contains(&Locator::css("table")));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
landing_url = "https://example.test/start"
no_results_markers = ["Nothing here"]

[challenge]
blocking_texts = ["Access denied"]
"#
        )
        .unwrap();

        let def = PortalDefinition::load(file.path()).unwrap();
        assert_eq!(def.landing_url, "https://example.test/start");
        assert_eq!(def.challenge.blocking_texts, vec!["Access denied"]);
        assert!(!def.challenge.selectors.is_empty());
        assert_eq!(def.submit, PortalDefinition::default().submit);
        assert_eq!(def.no_results_markers, vec!["Nothing here"]);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "submit = []").unwrap();
        let err = PortalDefinition::load(file.path()).unwrap_err();
        assert!(matches!(err, PortalError::ValidationError { .. }));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "landing_url = ").unwrap();
        let err = PortalDefinition::load(file.path()).unwrap_err();
        assert!(matches!(err, PortalError::ParseError { .. }));
    }
}
