use crate::workbook::{CellValue, Sheet};

use super::{MapperError, Record};

/// Turn a field identifier into a display header.
///
/// `_` becomes a space and capitalizes the next character, an uppercase
/// letter following a lowercase one starts a new word, and the first
/// character is uppercased: `firstName → First Name`,
/// `email_address → Email Address`.
pub fn humanize(field: &str) -> String {
    let mut header = String::with_capacity(field.len() + 4);
    let mut capitalize_next = true;
    let mut prev_lower = false;

    for c in field.chars() {
        if c == '_' {
            if !header.is_empty() && !header.ends_with(' ') {
                header.push(' ');
            }
            capitalize_next = true;
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower {
                header.push(' ');
            }
            header.push(c);
            capitalize_next = false;
            prev_lower = false;
        } else if capitalize_next {
            header.extend(c.to_uppercase());
            capitalize_next = false;
            prev_lower = c.is_lowercase();
        } else {
            header.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }

    header.trim_end().to_owned()
}

/// One projected column: which field feeds it and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub field: String,
    pub header: String,
    /// Target column when bound to a template; `None` means "next in order".
    pub index: Option<u16>,
}

/// How fields are matched against an existing header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchMode {
    /// `(field, header)` pairs; the header text must match exactly.
    Exact(Vec<(String, String)>),
    /// Field names; headers match the humanized or raw name, ignoring case.
    Auto(Vec<String>),
}

/// Ordered field → header (→ column index) mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSpec {
    columns: Vec<Column>,
}

impl ColumnSpec {
    /// Build from caller-supplied `(field, header)` pairs.
    pub fn explicit<F, H>(pairs: impl IntoIterator<Item = (F, H)>) -> Self
    where
        F: Into<String>,
        H: Into<String>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(field, header)| Column {
                    field: field.into(),
                    header: header.into(),
                    index: None,
                })
                .collect(),
        }
    }

    /// Derive columns from the shape of `sample`.
    pub fn from_sample<R: Record + ?Sized>(sample: &R) -> Self {
        Self {
            columns: sample
                .field_names()
                .into_iter()
                .map(|name| Column {
                    header: humanize(&name),
                    field: name.into_owned(),
                    index: None,
                })
                .collect(),
        }
    }

    /// Infer the spec from the first record of a batch.
    pub fn infer<R: Record>(records: &[R]) -> Result<Self, MapperError> {
        records
            .first()
            .map(Self::from_sample)
            .ok_or(MapperError::EmptyDataset)
    }

    /// Bind fields to the columns of an existing header row.
    ///
    /// The leftmost matching column wins. Fields without a match are left
    /// out of the resulting spec.
    pub fn resolve_against(sheet: &Sheet, header_row: u32, mode: &MatchMode) -> Result<Self, MapperError> {
        let row = sheet
            .row(header_row)
            .ok_or(MapperError::MissingHeaderRow { row: header_row })?;
        let headers: Vec<(u16, &str)> = row
            .cells()
            .filter_map(|(col, value)| match value {
                CellValue::Text(s) => Some((col, s.trim())),
                _ => None,
            })
            .collect();

        let columns = match mode {
            MatchMode::Exact(pairs) => pairs
                .iter()
                .filter_map(|(field, header)| {
                    headers
                        .iter()
                        .find(|(_, text)| *text == header.as_str())
                        .map(|(col, text)| Column {
                            field: field.clone(),
                            header: (*text).to_owned(),
                            index: Some(*col),
                        })
                })
                .collect(),
            MatchMode::Auto(fields) => fields
                .iter()
                .filter_map(|field| {
                    let expected = humanize(field);
                    headers
                        .iter()
                        .find(|(_, text)| {
                            text.eq_ignore_ascii_case(&expected) || text.eq_ignore_ascii_case(field)
                        })
                        .map(|(col, text)| Column {
                            field: field.clone(),
                            header: (*text).to_owned(),
                            index: Some(*col),
                        })
                })
                .collect(),
        };
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.header.as_str())
    }

    /// Target column for the `position`-th entry.
    pub fn target(&self, position: usize) -> u16 {
        self.columns[position]
            .index
            .unwrap_or(u16::try_from(position).unwrap_or(u16::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_known_pairs() {
        assert_eq!(humanize("firstName"), "First Name");
        assert_eq!(humanize("email_address"), "Email Address");
        assert_eq!(humanize("isActive"), "Is Active");
        assert_eq!(humanize("id"), "Id");
        assert_eq!(humanize("salary"), "Salary");
    }

    #[test]
    fn humanize_edge_shapes() {
        assert_eq!(humanize("userID"), "User ID");
        assert_eq!(humanize("snake_Case_mix"), "Snake Case Mix");
        assert_eq!(humanize("double__underscore"), "Double Underscore");
        assert_eq!(humanize("trailing_"), "Trailing");
        assert_eq!(humanize("_leading"), "Leading");
        assert_eq!(humanize("line2Total"), "Line2 Total");
        assert_eq!(humanize(""), "");
    }

    #[test]
    fn humanize_is_deterministic() {
        for name in ["firstName", "email_address", "isActive"] {
            assert_eq!(humanize(name), humanize(name));
        }
    }

    fn header_sheet() -> Sheet {
        let mut sheet = Sheet::new("T");
        let row = sheet.row_mut(4);
        row.set(0, "First Name");
        row.set(1, " EMAIL ");
        row.set(2, "department");
        row.set(3, 99.0);
        row.set(5, "First Name");
        sheet
    }

    #[test]
    fn auto_match_ignores_case_and_drops_unmatched() {
        let sheet = header_sheet();
        let mode = MatchMode::Auto(vec![
            "firstName".into(),
            "email".into(),
            "department".into(),
            "salary".into(),
        ]);
        let spec = ColumnSpec::resolve_against(&sheet, 4, &mode).unwrap();

        let bound: Vec<_> = spec
            .columns()
            .iter()
            .map(|c| (c.field.as_str(), c.index))
            .collect();
        assert_eq!(
            bound,
            vec![("firstName", Some(0)), ("email", Some(1)), ("department", Some(2))]
        );
    }

    #[test]
    fn exact_match_is_case_sensitive() {
        let sheet = header_sheet();
        let mode = MatchMode::Exact(vec![
            ("first".into(), "First Name".into()),
            ("mail".into(), "Email".into()),
            ("dept".into(), "department".into()),
        ]);
        let spec = ColumnSpec::resolve_against(&sheet, 4, &mode).unwrap();
        let bound: Vec<_> = spec
            .columns()
            .iter()
            .map(|c| (c.field.as_str(), c.index))
            .collect();
        assert_eq!(bound, vec![("first", Some(0)), ("dept", Some(2))]);
    }

    #[test]
    fn missing_header_row_is_reported() {
        let sheet = header_sheet();
        let err = ColumnSpec::resolve_against(&sheet, 0, &MatchMode::Auto(vec![])).unwrap_err();
        assert!(matches!(err, MapperError::MissingHeaderRow { row: 0 }));
    }

    #[test]
    fn targets_fall_back_to_position() {
        let spec = ColumnSpec::explicit([("a", "A"), ("b", "B")]);
        assert_eq!(spec.target(0), 0);
        assert_eq!(spec.target(1), 1);
        assert_eq!(spec.headers().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
