//! Record → spreadsheet projection.
//!
//! Records describe themselves through [`Record`]; a [`ColumnSpec`] decides
//! which fields land in which columns; [`write_rows`] turns both into cells.

mod columns;
mod record;
mod writer;

use thiserror::Error;

pub use columns::{Column, ColumnSpec, MatchMode, humanize};
pub use record::{FieldValue, JsonRecord, Record};
pub use writer::{write_header, write_rows};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapperError {
    /// No records to infer columns from or to write.
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("header row {row} not found in template")]
    MissingHeaderRow { row: u32 },
}
