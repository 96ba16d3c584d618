//! Retrieval requests and validated queries.
//!
//! A [`RetrievalRequest`] is what a caller hands over (loosely typed strings).
//! [`Query::from_request`] validates it into a [`Query`]; nothing downstream
//! ever sees an unvalidated identifier or period.

use crate::error::LeaseDropError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Which kind of identifier the query is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierType {
    /// Production lease number
    #[serde(rename = "Lease Number")]
    LeaseNumber,
    /// Drilling permit number
    #[serde(rename = "Drilling Permit Number")]
    DrillingPermitNumber,
}

impl IdentifierType {
    /// Wire/display label used by callers and the history store.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::LeaseNumber => "Lease Number",
            Self::DrillingPermitNumber => "Drilling Permit Number",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IdentifierType {
    type Err = LeaseDropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Lease Number" => Ok(Self::LeaseNumber),
            "Drilling Permit Number" => Ok(Self::DrillingPermitNumber),
            other => Err(LeaseDropError::Validation(format!(
                "invalid identifier_type '{other}': must be \"Lease Number\" or \"Drilling Permit Number\""
            ))),
        }
    }
}

/// Newtype for a 6-digit lease or permit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierValue(String);

impl IdentifierValue {
    /// Create a new `IdentifierValue`.
    ///
    /// # Errors
    /// Returns error unless the value is exactly six ASCII digits.
    pub fn new(value: impl Into<String>) -> Result<Self, LeaseDropError> {
        let value = value.into();
        static SIX_DIGITS: OnceLock<Regex> = OnceLock::new();
        let regex = SIX_DIGITS.get_or_init(|| Regex::new(r"^[0-9]{6}$").expect("valid regex"));

        if regex.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(LeaseDropError::Validation(format!(
                "invalid identifier_value: must be exactly 6 digits, got '{value}'"
            )))
        }
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentifierValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A filing period bound: `yymm` or `yy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    raw: String,
    year: u16,
    month: Option<u8>,
}

impl Period {
    /// Parse a period string.
    ///
    /// # Errors
    /// Returns error if the string is neither 2 nor 4 digits, or the month
    /// component is outside 01–12.
    pub fn parse(raw: &str) -> Result<Self, LeaseDropError> {
        static PERIOD: OnceLock<Regex> = OnceLock::new();
        let regex = PERIOD.get_or_init(|| {
            Regex::new(r"^(?P<yy>[0-9]{2})(?P<mm>[0-9]{2})?$").expect("valid regex")
        });

        let caps = regex.captures(raw).ok_or_else(|| {
            LeaseDropError::Validation(format!(
                "invalid period '{raw}': expected yymm (4 digits) or yy (2 digits)"
            ))
        })?;

        let yy: u16 = caps["yy"].parse().map_err(|_| {
            LeaseDropError::Validation(format!("invalid period '{raw}': bad year"))
        })?;
        let year = if yy < 50 { 2000 + yy } else { 1900 + yy };

        let month = match caps.name("mm") {
            Some(mm) => {
                let month: u8 = mm.as_str().parse().map_err(|_| {
                    LeaseDropError::Validation(format!("invalid period '{raw}': bad month"))
                })?;
                if !(1..=12).contains(&month) {
                    return Err(LeaseDropError::Validation(format!(
                        "invalid period '{raw}': month must be 01-12"
                    )));
                }
                Some(month)
            }
            None => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            year,
            month,
        })
    }

    /// The period exactly as the caller supplied it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether only a year was supplied.
    #[must_use]
    pub fn is_year_only(&self) -> bool {
        self.month.is_none()
    }

    /// Normalized `(year, month)` when used as the start of a range.
    #[must_use]
    pub fn as_start(&self) -> (u16, u8) {
        (self.year, self.month.unwrap_or(1))
    }

    /// Normalized `(year, month)` when used as the end of a range.
    #[must_use]
    pub fn as_end(&self) -> (u16, u8) {
        (self.year, self.month.unwrap_or(12))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Created, not yet finished
    Pending,
    /// Results retrieved (possibly zero rows)
    Success,
    /// Gave up with an error
    Failed,
    /// Aborted by the caller
    Cancelled,
}

impl QueryStatus {
    /// Lowercase label used in payloads and the history store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = LeaseDropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "started" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" | "error" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LeaseDropError::Validation(format!(
                "unknown query status '{other}'"
            ))),
        }
    }
}

/// Raw retrieval request as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// `"Lease Number"` or `"Drilling Permit Number"`
    pub identifier_type: String,
    /// 6-digit identifier
    pub identifier_value: String,
    /// Beginning period, `yymm` or `yy`
    pub beg_period: String,
    /// Ending period, `yymm` or `yy`
    pub end_period: String,
}

impl RetrievalRequest {
    /// Convenience constructor for a typed identifier.
    #[must_use]
    pub fn new(
        identifier_type: IdentifierType,
        identifier_value: impl Into<String>,
        beg_period: impl Into<String>,
        end_period: impl Into<String>,
    ) -> Self {
        Self {
            identifier_type: identifier_type.label().to_string(),
            identifier_value: identifier_value.into(),
            beg_period: beg_period.into(),
            end_period: end_period.into(),
        }
    }
}

/// A validated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    identifier_type: IdentifierType,
    identifier_value: IdentifierValue,
    beg_period: Period,
    end_period: Period,
    created_at: DateTime<Utc>,
    status: QueryStatus,
    ended_at: Option<DateTime<Utc>>,
}

impl Query {
    /// Validate a request into a pending query.
    ///
    /// # Errors
    /// Returns `LeaseDropError::Validation` on a bad identifier type, a value
    /// that is not 6 digits, an unrecognized period, or an end period that
    /// precedes the beginning period.
    pub fn from_request(request: &RetrievalRequest) -> Result<Self, LeaseDropError> {
        let identifier_type: IdentifierType = request.identifier_type.parse()?;
        let identifier_value = IdentifierValue::new(&request.identifier_value)?;
        let beg_period = Period::parse(&request.beg_period)?;
        let end_period = Period::parse(&request.end_period)?;

        if end_period.as_end() < beg_period.as_start() {
            return Err(LeaseDropError::Validation(format!(
                "end_period '{end_period}' precedes beg_period '{beg_period}'"
            )));
        }

        Ok(Self {
            identifier_type,
            identifier_value,
            beg_period,
            end_period,
            created_at: Utc::now(),
            status: QueryStatus::Pending,
            ended_at: None,
        })
    }

    /// Identifier type.
    #[must_use]
    pub fn identifier_type(&self) -> IdentifierType {
        self.identifier_type
    }

    /// Identifier value.
    #[must_use]
    pub fn identifier_value(&self) -> &IdentifierValue {
        &self.identifier_value
    }

    /// Beginning period.
    #[must_use]
    pub fn beg_period(&self) -> &Period {
        &self.beg_period
    }

    /// Ending period.
    #[must_use]
    pub fn end_period(&self) -> &Period {
        &self.end_period
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Completion timestamp, once finished.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Record the final status. The only mutation a query allows.
    pub fn finish(&mut self, status: QueryStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Summary view used in payloads and history listings.
    #[must_use]
    pub fn info(&self) -> QueryInfo {
        QueryInfo {
            id: None,
            timestamp: self.created_at,
            identifier_type: self.identifier_type.label().to_string(),
            identifier_value: self.identifier_value.to_string(),
            beg_period: self.beg_period.to_string(),
            end_period: self.end_period.to_string(),
            status: self.status,
        }
    }
}

/// Query summary as exchanged with callers and the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInfo {
    /// History store identifier, once persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// When the query was created
    pub timestamp: DateTime<Utc>,
    /// Identifier type label
    pub identifier_type: String,
    /// Identifier value
    pub identifier_value: String,
    /// Beginning period as supplied
    pub beg_period: String,
    /// Ending period as supplied
    pub end_period: String,
    /// Final or current status
    pub status: QueryStatus,
}

impl QueryInfo {
    /// Build a summary straight from a request that never became a `Query`.
    #[must_use]
    pub fn from_request(request: &RetrievalRequest, status: QueryStatus) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            identifier_type: request.identifier_type.clone(),
            identifier_value: request.identifier_value.clone(),
            beg_period: request.beg_period.clone(),
            end_period: request.end_period.clone(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: &str, beg: &str, end: &str) -> RetrievalRequest {
        RetrievalRequest::new(IdentifierType::LeaseNumber, value, beg, end)
    }

    #[test]
    fn test_valid_requests() {
        for (value, beg, end) in [
            ("011457", "1601", "2001"),
            ("123456", "16", "20"),
            ("000000", "2001", "2001"),
            ("999999", "19", "1912"),
            ("654321", "9912", "0001"),
        ] {
            let query = Query::from_request(&request(value, beg, end));
            assert!(query.is_ok(), "{value} {beg} {end}: {query:?}");
        }
    }

    #[test]
    fn test_identifier_must_be_six_digits() {
        for value in ["12345", "1234567", "12a456", "", "12 456", " 011457", "011457\n"] {
            let err = Query::from_request(&request(value, "1601", "2001")).unwrap_err();
            assert!(matches!(err, LeaseDropError::Validation(_)), "{value}");
        }
    }

    #[test]
    fn test_period_format() {
        for period in ["1", "160", "16011", "16a1", "1613", "1600", "yyyy", " 1601"] {
            let err = Query::from_request(&request("011457", period, "2001")).unwrap_err();
            assert!(matches!(err, LeaseDropError::Validation(_)), "{period}");
        }
    }

    #[test]
    fn test_end_before_beginning_rejected() {
        let err = Query::from_request(&request("011457", "2001", "1601")).unwrap_err();
        assert!(err.to_string().contains("precedes"));

        // yy end normalizes to December, so a same-year yymm start is fine
        assert!(Query::from_request(&request("011457", "2006", "20")).is_ok());
        // yy start normalizes to January of that year
        assert!(Query::from_request(&request("011457", "21", "2012")).is_err());
    }

    #[test]
    fn test_identifier_type_parsing() {
        assert_eq!(
            "Drilling Permit Number".parse::<IdentifierType>().unwrap(),
            IdentifierType::DrillingPermitNumber
        );
        assert!("Permit".parse::<IdentifierType>().is_err());
    }

    #[test]
    fn test_query_info_uses_wire_labels() {
        let mut query = Query::from_request(&request("011457", "1601", "2001")).unwrap();
        assert_eq!(query.status(), QueryStatus::Pending);
        query.finish(QueryStatus::Success);

        let info = query.info();
        assert_eq!(info.identifier_type, "Lease Number");
        assert_eq!(info.status, QueryStatus::Success);
        assert!(query.ended_at().is_some());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("id").is_none());
    }
}
