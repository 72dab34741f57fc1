use crate::workbook::{CellValue, Sheet};

use super::{ColumnSpec, MapperError, Record};

/// Write the spec's headers into `row`, one per column target.
pub fn write_header(sheet: &mut Sheet, spec: &ColumnSpec, row: u32) {
    let target = sheet.row_mut(row);
    for (position, column) in spec.columns().iter().enumerate() {
        target.set(spec.target(position), column.header.as_str());
    }
}

/// Project `records` into consecutive rows starting at `start_row`.
///
/// Each record fills exactly one row and every column of `spec` gets a cell.
/// A field the record cannot produce becomes a blank cell. Cells outside the
/// targeted columns and rows are never touched. Returns the number of rows
/// written.
pub fn write_rows<R: Record>(
    sheet: &mut Sheet,
    records: &[R],
    spec: &ColumnSpec,
    start_row: u32,
) -> Result<usize, MapperError> {
    if records.is_empty() {
        return Err(MapperError::EmptyDataset);
    }

    for (offset, record) in records.iter().enumerate() {
        let row_index = start_row.saturating_add(u32::try_from(offset).unwrap_or(u32::MAX));
        let row = sheet.row_mut(row_index);
        for (position, column) in spec.columns().iter().enumerate() {
            let value = record
                .field(&column.field)
                .map(CellValue::from)
                .unwrap_or(CellValue::Blank);
            row.set(spec.target(position), value);
        }
    }

    Ok(records.len())
}
