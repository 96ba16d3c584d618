//! Results page extraction.
//!
//! The report page renders one results table, sometimes nested inside
//! layout tables. Column headers vary between
//! report layouts, so the production and period columns are located by
//! keyword, and layouts without a period column carry the period in
//! `Period: yymm` marker rows instead.

use crate::error::{Result, RetrievalError};
use leasedrop_core::{Extraction, ResultRow};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::debug;

/// Name given to the period column synthesized from marker rows.
pub const MARKER_PERIOD_COLUMN: &str = "Period";

const PERIOD_MARKER: &str = "Period:";
const TAXPAYER_COLUMN: &str = "Primary Taxpayer #";

/// Turns results page HTML into normalized rows.
#[derive(Debug, Clone, Default)]
pub struct ResultExtractor {
    no_results_markers: Vec<String>,
}

/// Header cells and data rows of one HTML table.
#[derive(Debug)]
struct Grid {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Clone, Copy)]
enum PeriodSource {
    Column(usize),
    Markers { taxpayer: Option<usize> },
}

impl ResultExtractor {
    /// Extractor that treats any of `markers` (case-insensitive) as an
    /// empty result page.
    #[must_use]
    pub fn new(markers: &[String]) -> Self {
        Self {
            no_results_markers: markers
                .iter()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Extract the first table whose header maps to a production column.
    ///
    /// No-results markers only apply when no table yields one, so a data
    /// table is never discarded over a footnote.
    pub fn extract(&self, html: &str) -> Result<Extraction> {
        let document = Html::parse_document(html);
        let table_selector = selector("table")?;

        let mut tables_seen = 0;
        let mut first_error = None;
        for table in document.select(&table_selector) {
            tables_seen += 1;
            match Grid::read(table).extract() {
                Ok(Some(extraction)) => {
                    debug!(
                        production_column = %extraction.production_column,
                        date_column = %extraction.date_column,
                        rows = extraction.rows.len(),
                        "results table extracted"
                    );
                    return Ok(extraction);
                }
                Ok(None) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        let lowered = html.to_lowercase();
        if let Some(marker) = self
            .no_results_markers
            .iter()
            .find(|m| lowered.contains(m.as_str()))
        {
            debug!("No-results marker \"{}\" on page", marker);
            return Ok(Extraction::empty());
        }

        Err(first_error.unwrap_or_else(|| {
            RetrievalError::Parse(if tables_seen == 0 {
                "page contains no tables".to_string()
            } else {
                format!("none of {tables_seen} tables has a production column")
            })
        }))
    }
}

impl Grid {
    /// Read the table's own rows and cells; nested tables are left to
    /// their own pass.
    fn read(table: ElementRef<'_>) -> Self {
        let rows = own_rows(table);
        let header_index = rows
            .iter()
            .position(|row| own_cells(*row).any(|cell| cell.value().name() == "th"))
            .unwrap_or(0);

        let mut grid = Self {
            headers: Vec::new(),
            rows: Vec::new(),
        };
        for (index, row) in rows.iter().enumerate().skip(header_index) {
            let mut cells = Vec::new();
            for cell in own_cells(*row) {
                let span = cell
                    .value()
                    .attr("colspan")
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .unwrap_or(1)
                    .max(1);
                cells.push(cell_text(cell));
                cells.extend(std::iter::repeat(String::new()).take(span - 1));
            }
            if index == header_index {
                grid.headers = unique_headers(cells);
            } else if cells.iter().any(|c| !c.is_empty()) {
                grid.rows.push(cells);
            }
        }
        grid
    }

    fn column(&self, index: usize) -> impl Iterator<Item = Option<&str>> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str))
    }

    fn find_header(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| predicate(&header.to_uppercase()))
    }

    /// Production column by header keyword, in priority order.
    fn named_production_column(&self) -> Option<usize> {
        self.find_header(|h| h.contains("CRUDE") && h.contains("OIL"))
            .or_else(|| self.find_header(|h| h.contains("GROSS") && h.contains("BARRELS")))
            .or_else(|| self.find_header(|h| h.contains("BARRELS") || h.contains("BBL")))
    }

    /// First column whose cells are mostly numeric with a positive sum.
    fn numeric_production_column(&self) -> Option<usize> {
        if self.rows.is_empty() {
            return None;
        }
        (0..self.headers.len()).find(|&index| {
            let header = &self.headers[index];
            if is_period_header(header) || header == TAXPAYER_COLUMN {
                return false;
            }
            let values: Vec<f64> = self
                .column(index)
                .filter_map(|cell| cell.and_then(parse_number))
                .collect();
            values.len() * 2 > self.rows.len() && values.iter().sum::<f64>() > 0.0
        })
    }

    fn period_source(&self) -> Option<PeriodSource> {
        if let Some(index) = self.headers.iter().position(|h| is_period_header(h)) {
            return Some(PeriodSource::Column(index));
        }
        let has_markers = self
            .rows
            .iter()
            .any(|row| row.iter().any(|c| c.contains(PERIOD_MARKER)));
        has_markers.then(|| PeriodSource::Markers {
            taxpayer: self.headers.iter().position(|h| h == TAXPAYER_COLUMN),
        })
    }

    fn extract(&self) -> Result<Option<Extraction>> {
        let production = match self.named_production_column() {
            Some(index) => index,
            None => match self.numeric_production_column() {
                Some(index) => index,
                None => return Ok(None),
            },
        };
        let production_column = self.headers[production].clone();

        if self.rows.is_empty() {
            return Ok(Some(Extraction {
                production_column,
                date_column: String::new(),
                rows: Vec::new(),
            }));
        }

        let source = self
            .period_source()
            .ok_or(RetrievalError::NoPeriodColumn)?;
        let date_column = match source {
            PeriodSource::Column(index) => self.headers[index].clone(),
            PeriodSource::Markers { .. } => MARKER_PERIOD_COLUMN.to_string(),
        };

        let mut rows = Vec::new();
        let mut current_period = String::new();
        for cells in &self.rows {
            let period = match source {
                PeriodSource::Column(index) => cells.get(index).cloned().unwrap_or_default(),
                PeriodSource::Markers { taxpayer } => {
                    if let Some(period) = marker_period(cells, taxpayer) {
                        current_period = period;
                        continue;
                    }
                    current_period.clone()
                }
            };

            let Some(value) = cells.get(production).and_then(|c| parse_number(c)) else {
                continue;
            };

            let mut values = BTreeMap::new();
            values.insert(production_column.clone(), value);
            for (index, header) in self.headers.iter().enumerate() {
                if index == production || header == &date_column || header == TAXPAYER_COLUMN {
                    continue;
                }
                if let Some(v) = cells.get(index).and_then(|c| parse_number(c)) {
                    values.insert(header.clone(), v);
                }
            }
            rows.push(ResultRow { period, values });
        }

        Ok(Some(Extraction {
            production_column,
            date_column,
            rows,
        }))
    }
}

/// Period carried by a marker row, if `cells` is one.
fn marker_period(cells: &[String], taxpayer: Option<usize>) -> Option<String> {
    let filled: Vec<&String> = cells.iter().filter(|c| !c.is_empty()).collect();
    let spanning = match filled.as_slice() {
        [only] if only.contains(PERIOD_MARKER) => Some(only.as_str()),
        _ => None,
    };
    let cell = spanning.or_else(|| {
        taxpayer
            .and_then(|index| cells.get(index))
            .filter(|c| c.contains(PERIOD_MARKER))
            .map(String::as_str)
    })?;
    cell.split(PERIOD_MARKER)
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(ToString::to_string)
}

fn is_period_header(header: &str) -> bool {
    let upper = header.to_uppercase();
    upper.contains("DATE") || upper.contains("PERIOD")
}

fn child_elements<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element.children().filter_map(ElementRef::wrap)
}

/// Rows belonging to `table` itself, directly or through its sections.
fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in child_elements(table) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => {
                rows.extend(child_elements(child).filter(|e| e.value().name() == "tr"));
            }
            _ => {}
        }
    }
    rows
}

fn own_cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    child_elements(row).filter(|e| matches!(e.value().name(), "th" | "td"))
}

/// Whitespace-normalized cell text. A cell wrapping a nested table reads
/// as empty.
fn cell_text(cell: ElementRef<'_>) -> String {
    let wraps_table = cell
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().name() == "table");
    if wraps_table {
        return String::new();
    }
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Empty headers get positional names; repeats get a numeric suffix.
fn unique_headers(cells: Vec<String>) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    cells
        .into_iter()
        .enumerate()
        .map(|(index, header)| {
            let header = if header.is_empty() {
                format!("Column {}", index + 1)
            } else {
                header
            };
            let count = seen.entry(header.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                header
            } else {
                format!("{header} ({count})")
            }
        })
        .collect()
}

/// Parse a report cell: thousands separators, whitespace, currency signs
/// and parenthesized negatives are accepted.
#[must_use]
pub fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '$'))
        .collect();
    let (negative, digits) = match cleaned
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };
    if digits.is_empty() {
        return None;
    }
    let value = digits.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negative { -value } else { value })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| RetrievalError::Parse(format!("selector {css}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ResultExtractor {
        ResultExtractor::new(&["No records found".to_string()])
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1,234"), Some(1234.0));
        assert_eq!(parse_number(" $ 12.50 "), Some(12.5));
        assert_eq!(parse_number("(1,000)"), Some(-1000.0));
        assert_eq!(parse_number("-3"), Some(-3.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_period_column_table() {
        let html = r"
            <table>
              <tr><th>Filing Period</th><th>Gross Barrels</th><th>Tax Due</th></tr>
              <tr><td>1601</td><td>1,000</td><td>$46.00</td></tr>
              <tr><td>1602</td><td>1,500</td><td>$69.00</td></tr>
              <tr><td>1603</td><td>--</td><td>$0.00</td></tr>
            </table>";

        let extraction = extractor().extract(html).unwrap();
        assert_eq!(extraction.production_column, "Gross Barrels");
        assert_eq!(extraction.date_column, "Filing Period");
        assert_eq!(extraction.rows.len(), 2);
        assert_eq!(extraction.rows[1].period, "1602");
        assert_eq!(extraction.rows[1].value("Tax Due"), Some(69.0));
        assert_eq!(extraction.production_values(), vec![1000.0, 1500.0]);
    }

    #[test]
    fn test_crude_oil_beats_barrels() {
        let html = r"
            <table>
              <tr><th>Period</th><th>Net BBL</th><th>Crude Oil Volume</th></tr>
              <tr><td>1601</td><td>5</td><td>700</td></tr>
            </table>";

        let extraction = extractor().extract(html).unwrap();
        assert_eq!(extraction.production_column, "Crude Oil Volume");
        assert_eq!(extraction.production_values(), vec![700.0]);
    }

    #[test]
    fn test_period_marker_rows() {
        let html = r"
            <table>
              <tr><th>Primary Taxpayer #</th><th>Taxpayer Name</th><th>Volume</th></tr>
              <tr><td>Period: 1601</td><td></td><td></td></tr>
              <tr><td>32012345678</td><td>ACME OIL</td><td>1,200</td></tr>
              <tr><td>32087654321</td><td>BETA ENERGY</td><td>300</td></tr>
              <tr><td colspan='3'>Period: 1602</td></tr>
              <tr><td>32012345678</td><td>ACME OIL</td><td>(50)</td></tr>
            </table>";

        let extraction = extractor().extract(html).unwrap();
        assert_eq!(extraction.production_column, "Volume");
        assert_eq!(extraction.date_column, MARKER_PERIOD_COLUMN);
        let periods: Vec<&str> = extraction.rows.iter().map(|r| r.period.as_str()).collect();
        assert_eq!(periods, vec!["1601", "1601", "1602"]);
        assert_eq!(extraction.production_values(), vec![1200.0, 300.0, -50.0]);
    }

    #[test]
    fn test_skips_layout_tables() {
        let html = r"
            <table><tr><td>Texas Comptroller</td><td>Menu</td></tr></table>
            <table>
              <tr><th>Period</th><th>Gross Barrels</th></tr>
              <tr><td>1601</td><td>10</td></tr>
            </table>";

        let extraction = extractor().extract(html).unwrap();
        assert_eq!(extraction.rows.len(), 1);
    }

    #[test]
    fn test_no_records_marker_is_empty() {
        let html = "<html><body><p>NO RECORDS FOUND for the criteria</p></body></html>";
        let extraction = extractor().extract(html).unwrap();
        assert!(extraction.rows.is_empty());
    }

    #[test]
    fn test_nested_results_table() {
        let html = r"
            <table id='layout'>
              <tr><th>Texas Comptroller of Public Accounts</th></tr>
              <tr><td>
                <table>
                  <tr><th>Filing Period</th><th>Gross Barrels</th></tr>
                  <tr><td>1601</td><td>1,000</td></tr>
                  <tr><td>1602</td><td>1,500</td></tr>
                </table>
              </td></tr>
            </table>";

        let extraction = extractor().extract(html).unwrap();
        assert_eq!(extraction.production_column, "Gross Barrels");
        assert_eq!(extraction.date_column, "Filing Period");
        assert_eq!(extraction.production_values(), vec![1000.0, 1500.0]);
    }

    #[test]
    fn test_marker_text_does_not_hide_data() {
        let extractor = ResultExtractor::new(&["no records".to_string()]);
        let html = r"
            <table>
              <tr><th>Period</th><th>Gross Barrels</th></tr>
              <tr><td>1601</td><td>10</td></tr>
              <tr><td>1602</td><td>20</td></tr>
            </table>
            <p>Amended reports are included; no records were omitted.</p>";

        let extraction = extractor.extract(html).unwrap();
        assert_eq!(extraction.production_values(), vec![10.0, 20.0]);
    }

    #[test]
    fn test_marker_beats_unrelated_tables() {
        let html = r"
            <table><tr><td>Lease Number</td><td>011457</td></tr></table>
            <p>No records found</p>";
        let extraction = extractor().extract(html).unwrap();
        assert!(extraction.rows.is_empty());
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let html = "<table><tr><th>Period</th><th>Gross Barrels</th></tr></table>";
        let extraction = extractor().extract(html).unwrap();
        assert_eq!(extraction.production_column, "Gross Barrels");
        assert!(extraction.rows.is_empty());
    }

    #[test]
    fn test_unrecognized_page_is_parse_error() {
        let err = extractor().extract("<html><body>Welcome</body></html>").unwrap_err();
        assert!(matches!(err, RetrievalError::Parse(_)));

        let err = extractor()
            .extract("<table><tr><th>Name</th></tr><tr><td>ACME</td></tr></table>")
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Parse(_)));
    }

    #[test]
    fn test_missing_period_is_error() {
        let html = r"
            <table>
              <tr><th>Operator</th><th>Gross Barrels</th></tr>
              <tr><td>ACME</td><td>10</td></tr>
            </table>";
        let err = extractor().extract(html).unwrap_err();
        assert!(matches!(err, RetrievalError::NoPeriodColumn));
    }
}
