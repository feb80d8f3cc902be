//! CSV encoding of decoded rows.

use std::io::Write;

use csv::{Terminator, WriterBuilder};
use reportharvest_shared::{HarvestError, Result};

/// Byte-order mark written ahead of every CSV so spreadsheet tools pick UTF-8.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Write `rows` to `out` as BOM-prefixed, CRLF-terminated CSV.
///
/// Rows may have different lengths; each is written as-is. Returns the
/// writer once everything has been flushed into it.
pub fn encode_csv<W: Write>(rows: &[Vec<String>], mut out: W) -> Result<W> {
    out.write_all(UTF8_BOM)
        .map_err(|e| HarvestError::Storage(format!("failed to write BOM: {e}")))?;

    let mut writer = WriterBuilder::new()
        .flexible(true)
        .terminator(Terminator::CRLF)
        .from_writer(out);

    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| HarvestError::Storage(format!("failed to write CSV record: {e}")))?;
    }

    writer
        .into_inner()
        .map_err(|e| HarvestError::Storage(format!("failed to flush CSV: {}", e.error())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn starts_with_bom_and_uses_crlf() {
        let out = encode_csv(&rows(&[&["Course", "Score"], &["Calculus", "91.5"]]), Vec::new())
            .unwrap();
        assert!(out.starts_with(UTF8_BOM));
        assert_eq!(&out[UTF8_BOM.len()..], b"Course,Score\r\nCalculus,91.5\r\n");
    }

    #[test]
    fn quotes_fields_that_need_it() {
        let out = encode_csv(&rows(&[&["Smith, J.", "say \"hi\"", "多行\n文本"]]), Vec::new())
            .unwrap();
        let text = std::str::from_utf8(&out[UTF8_BOM.len()..]).unwrap();
        assert_eq!(text, "\"Smith, J.\",\"say \"\"hi\"\"\",\"多行\n文本\"\r\n");
    }

    #[test]
    fn ragged_rows_are_kept() {
        let out = encode_csv(&rows(&[&["a", "b", "c"], &["d"], &["e", "f"]]), Vec::new()).unwrap();
        let text = std::str::from_utf8(&out[UTF8_BOM.len()..]).unwrap();
        assert_eq!(text, "a,b,c\r\nd\r\ne,f\r\n");
    }

    #[test]
    fn empty_sheet_is_just_a_bom() {
        let out = encode_csv(&[], Vec::new()).unwrap();
        assert_eq!(out, UTF8_BOM);
    }
}
