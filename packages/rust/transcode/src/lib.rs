//! Spreadsheet-to-CSV transcoding.
//!
//! Decodes the first sheet of a rendered report workbook into rows of cell
//! text, then encodes those rows as BOM-prefixed CSV for the output store.

mod delimited;
mod sheet;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use delimited::{UTF8_BOM, encode_csv};
pub use sheet::decode_first_sheet;

/// Rows of cell text, in sheet order.
pub type Rows = Vec<Vec<String>>;
