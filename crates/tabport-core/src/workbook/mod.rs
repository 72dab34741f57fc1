//! Sparse in-memory spreadsheet model.
//!
//! A [`Workbook`] owns an ordered list of [`Sheet`]s; each sheet holds rows
//! keyed by zero-based index and each row holds cells keyed by zero-based
//! column.  Rows and cells are created on first mutable access, so writing
//! into a loaded template never disturbs cells outside the written range.
//!
//! The byte encoding lives in [`xlsx`]; nothing else in the crate depends on
//! the file format.

pub mod xlsx;

use std::collections::BTreeMap;

use thiserror::Error;

/// Maximum sheet-name length accepted by spreadsheet applications.
const MAX_SHEET_NAME: usize = 31;

/// Sheet name and text of the artifact produced for an empty dataset.
pub const NO_DATA_SHEET: &str = "No Data";
pub const NO_DATA_TEXT: &str = "No data available";

/// Errors raised while encoding or decoding a workbook.
#[derive(Debug, Error)]
pub enum WorkbookError {
    /// The archive container could not be read or written.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An XML part was malformed.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A filesystem or buffer I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A part required by the package layout is missing.
    #[error("workbook part missing: {0}")]
    MissingPart(String),

    /// A cell reference such as `B7` could not be parsed.
    #[error("invalid cell reference: {0}")]
    InvalidReference(String),
}

/// The value stored in a single cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    /// Returns the text content if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Blank)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

/// A single sheet row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: BTreeMap<u16, CellValue>,
}

impl Row {
    pub fn cell(&self, col: u16) -> Option<&CellValue> {
        self.cells.get(&col)
    }

    /// Get or create the cell at `col`.
    pub fn cell_mut(&mut self, col: u16) -> &mut CellValue {
        self.cells.entry(col).or_default()
    }

    pub fn set(&mut self, col: u16, value: impl Into<CellValue>) {
        self.cells.insert(col, value.into());
    }

    /// Iterate cells in column order.
    pub fn cells(&self) -> impl Iterator<Item = (u16, &CellValue)> {
        self.cells.iter().map(|(c, v)| (*c, v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A named sheet of sparse rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    rows: BTreeMap<u32, Row>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: sanitize_sheet_name(&name.into()),
            rows: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row(&self, index: u32) -> Option<&Row> {
        self.rows.get(&index)
    }

    /// Get or create the row at `index`.
    pub fn row_mut(&mut self, index: u32) -> &mut Row {
        self.rows.entry(index).or_default()
    }

    /// Iterate rows in index order.
    pub fn rows(&self) -> impl Iterator<Item = (u32, &Row)> {
        self.rows.iter().map(|(i, r)| (*i, r))
    }

    pub fn last_row_index(&self) -> Option<u32> {
        self.rows.keys().next_back().copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Convenience accessor for the cell at `(row, col)`.
    pub fn cell(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.rows.get(&row).and_then(|r| r.cell(col))
    }

    /// Replace `${key}` tokens in every text cell with the matching value.
    ///
    /// Tokens without a matching key are left untouched.
    pub fn fill_placeholders(&mut self, values: &BTreeMap<String, String>) {
        if values.is_empty() {
            return;
        }
        for row in self.rows.values_mut() {
            for cell in row.cells.values_mut() {
                if let CellValue::Text(text) = cell {
                    if text.contains("${") {
                        *text = substitute(text, values);
                    }
                }
            }
        }
    }
}

/// An ordered collection of sheets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new sheet and return it for writing.
    ///
    /// Duplicate names get a numeric suffix so every sheet name stays unique.
    pub fn create_sheet(&mut self, name: &str) -> &mut Sheet {
        let base = sanitize_sheet_name(name);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(&candidate)) {
            let suffix = format!(" ({n})");
            let keep = MAX_SHEET_NAME.saturating_sub(suffix.len());
            candidate = format!("{}{suffix}", truncate_chars(&base, keep));
            n += 1;
        }
        self.sheets.push(Sheet {
            name: candidate,
            rows: BTreeMap::new(),
        });
        let last = self.sheets.len() - 1;
        &mut self.sheets[last]
    }

    pub fn push_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Sheet> {
        self.sheets.get_mut(index)
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// Serialize to an `.xlsx` package.
    pub fn to_xlsx(&self) -> Result<Vec<u8>, WorkbookError> {
        xlsx::write(self)
    }

    /// Load a workbook from `.xlsx` bytes (e.g. a template).
    pub fn from_xlsx(bytes: &[u8]) -> Result<Self, WorkbookError> {
        xlsx::read(bytes)
    }
}

/// The artifact substituted when a job yields no records.
pub fn placeholder_workbook() -> Workbook {
    let mut workbook = Workbook::new();
    workbook
        .create_sheet(NO_DATA_SHEET)
        .row_mut(0)
        .set(0, NO_DATA_TEXT);
    workbook
}

fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'');
    if cleaned.is_empty() {
        return "Sheet1".to_owned();
    }
    truncate_chars(cleaned, MAX_SHEET_NAME).to_owned()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn substitute(text: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match values.get(key) {
                    Some(v) => out.push_str(v),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_cells_are_created_on_demand() {
        let mut sheet = Sheet::new("Data");
        sheet.row_mut(3).set(2, "x");
        *sheet.row_mut(3).cell_mut(0) = CellValue::Number(4.0);

        assert_eq!(sheet.row_count(), 1);
        assert_eq!(sheet.cell(3, 2), Some(&CellValue::Text("x".into())));
        assert_eq!(sheet.cell(3, 0), Some(&CellValue::Number(4.0)));
        assert!(sheet.cell(0, 0).is_none());
        assert_eq!(sheet.last_row_index(), Some(3));
    }

    #[test]
    fn sheet_names_are_sanitized_and_deduplicated() {
        let mut wb = Workbook::new();
        wb.create_sheet("Q1/Q2 [draft]");
        wb.create_sheet("q1_q2 _draft_");
        let names: Vec<_> = wb.sheets().iter().map(|s| s.name().to_owned()).collect();
        assert_eq!(names, vec!["Q1_Q2 _draft_", "q1_q2 _draft_ (2)"]);

        let long = "x".repeat(40);
        assert_eq!(Sheet::new(long).name().len(), MAX_SHEET_NAME);
        assert_eq!(Sheet::new("  ").name(), "Sheet1");
    }

    #[test]
    fn placeholders_fill_known_keys_only() {
        let mut sheet = Sheet::new("T");
        sheet.row_mut(0).set(0, "${title}");
        sheet.row_mut(1).set(0, "Generated: ${generatedDate} by ${who}");
        sheet.row_mut(2).set(0, 12.0);
        sheet.row_mut(3).set(0, "broken ${title");

        let mut values = BTreeMap::new();
        values.insert("title".to_owned(), "Employee Report".to_owned());
        values.insert("generatedDate".to_owned(), "01/02/2026 10:00:00".to_owned());
        sheet.fill_placeholders(&values);

        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some("Employee Report"));
        assert_eq!(
            sheet.cell(1, 0).and_then(CellValue::as_text),
            Some("Generated: 01/02/2026 10:00:00 by ${who}")
        );
        assert_eq!(sheet.cell(2, 0), Some(&CellValue::Number(12.0)));
        assert_eq!(sheet.cell(3, 0).and_then(CellValue::as_text), Some("broken ${title"));
    }

    #[test]
    fn placeholder_workbook_has_single_no_data_cell() {
        let wb = placeholder_workbook();
        assert_eq!(wb.sheets().len(), 1);
        let sheet = wb.sheet(0).unwrap();
        assert_eq!(sheet.name(), NO_DATA_SHEET);
        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some(NO_DATA_TEXT));
    }
}
