//! First-sheet decoding.

use std::io::Cursor;

use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use tracing::{debug, instrument};

use reportharvest_shared::{HarvestError, Result};

use crate::Rows;

/// Decode the first sheet of a workbook into rows of cell text.
///
/// The format is sniffed, so legacy `.xls` as well as `.xlsx`/`.ods` payloads
/// are accepted. Leading empty rows and columns, which the decoder trims, are
/// restored so every cell keeps its sheet coordinates.
#[instrument(skip_all, fields(size = bytes.len()))]
pub fn decode_first_sheet(bytes: &[u8]) -> Result<Rows> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| HarvestError::decode(format!("unrecognized workbook: {e}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| HarvestError::decode("workbook has no sheets"))?
        .map_err(|e| HarvestError::decode(format!("first sheet unreadable: {e}")))?;

    let rows = range_to_rows(&range);
    debug!(rows = rows.len(), "sheet decoded");
    Ok(rows)
}

fn range_to_rows(range: &Range<Data>) -> Rows {
    let Some((start_row, start_col)) = range.start() else {
        return Vec::new();
    };
    let start_row = start_row as usize;
    let start_col = start_col as usize;
    let width = start_col + range.width();

    let mut rows = Vec::with_capacity(start_row + range.height());
    rows.extend((0..start_row).map(|_| vec![String::new(); width]));

    for cells in range.rows() {
        let mut row = Vec::with_capacity(width);
        row.resize(start_col, String::new());
        row.extend(cells.iter().map(cell_text));
        rows.push(row);
    }

    rows
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::workbook;

    fn text(cell: &str, value: &str) -> String {
        format!(r#"<c r="{cell}" t="inlineStr"><is><t>{value}</t></is></c>"#)
    }

    fn number(cell: &str, value: &str) -> String {
        format!(r#"<c r="{cell}"><v>{value}</v></c>"#)
    }

    #[test]
    fn decodes_rows_in_order() {
        let rows_xml = format!(
            r#"<row r="1">{}{}{}</row><row r="2">{}{}{}</row><row r="3">{}{}{}</row>"#,
            text("A1", "Course"),
            text("B1", "Credits"),
            text("C1", "Score"),
            text("A2", "Calculus"),
            number("B2", "4"),
            number("C2", "91.5"),
            text("A3", "Physics"),
            number("B3", "3"),
            number("C3", "85"),
        );

        let rows = decode_first_sheet(&workbook(&rows_xml)).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["Course", "Credits", "Score"],
                vec!["Calculus", "4", "91.5"],
                vec!["Physics", "3", "85"],
            ]
        );
    }

    #[test]
    fn restores_leading_blank_rows_and_columns() {
        let rows_xml = format!(
            r#"<row r="2">{}{}</row><row r="3">{}</row>"#,
            text("B2", "Name"),
            text("C2", "Id"),
            number("C3", "7"),
        );

        let rows = decode_first_sheet(&workbook(&rows_xml)).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["", "", ""],
                vec!["", "Name", "Id"],
                vec!["", "", "7"],
            ]
        );
    }

    #[test]
    fn decodes_legacy_xls_workbook() {
        let rows = decode_first_sheet(include_bytes!("../tests/data/grades.xls")).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["课程", "Credits", "Score"],
                vec!["Calculus", "4", "91.5"],
                vec!["Physics", "3", "85"],
            ]
        );
    }

    #[test]
    fn empty_sheet_has_no_rows() {
        let rows = decode_first_sheet(&workbook("")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn garbage_bytes_are_a_permanent_decode_error() {
        let err = decode_first_sheet(b"<html>Session expired</html>").unwrap_err();
        assert!(matches!(err, HarvestError::Decode { .. }));
        assert!(err.is_permanent());
    }
}
