use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::debug;

use crate::config::ViewOptions;
use crate::error::{ConvertWarning, Stage, ViewError, panic_message};
use crate::ir::{Block, Document, Page, Paragraph, Table, TableCell, TablePage, TableRow};
use crate::parser::Parser;
use crate::parser::metadata::extract_metadata;

/// Reads the first sheet of a workbook into a single [`TablePage`].
///
/// Further sheets are ignored.
pub struct XlsxParser;

/// A (column, row) coordinate pair (1-indexed).
type CellPos = (u32, u32);

/// Info about a merged cell region, keyed by its top-left coordinate.
struct MergeInfo {
    col_span: u32,
    row_span: u32,
}

/// Build a lookup of merge info from the sheet's merged cell ranges.
///
/// Returns two structures:
/// - `top_left_map`: top-left coordinate → MergeInfo for each merge
/// - `skip_set`: set of coordinates that are inside a merge but NOT the top-left
fn build_merge_maps(
    sheet: &umya_spreadsheet::Worksheet,
) -> (HashMap<CellPos, MergeInfo>, HashSet<CellPos>) {
    let mut top_left_map: HashMap<CellPos, MergeInfo> = HashMap::new();
    let mut skip_set: HashSet<CellPos> = HashSet::new();

    for range in sheet.get_merge_cells() {
        let start_col = range
            .get_coordinate_start_col()
            .map(|c| *c.get_num())
            .unwrap_or(1);
        let start_row = range
            .get_coordinate_start_row()
            .map(|r| *r.get_num())
            .unwrap_or(1);
        let end_col = range
            .get_coordinate_end_col()
            .map(|c| *c.get_num())
            .unwrap_or(start_col);
        let end_row = range
            .get_coordinate_end_row()
            .map(|r| *r.get_num())
            .unwrap_or(start_row);

        let col_span = end_col.saturating_sub(start_col) + 1;
        let row_span = end_row.saturating_sub(start_row) + 1;

        top_left_map.insert((start_col, start_row), MergeInfo { col_span, row_span });

        for r in start_row..=end_row {
            for c in start_col..=end_col {
                if r != start_row || c != start_col {
                    skip_set.insert((c, r));
                }
            }
        }
    }

    (top_left_map, skip_set)
}

/// Convert one worksheet to a table in reading order (row-major).
fn convert_sheet(sheet: &umya_spreadsheet::Worksheet) -> Table {
    let (mut max_col, mut max_row) = sheet.get_highest_column_and_row();
    if max_col == 0 || max_row == 0 {
        return Table::default();
    }

    // Expand grid to include the extent of all merged ranges
    for range in sheet.get_merge_cells() {
        if let Some(c) = range.get_coordinate_end_col() {
            max_col = max_col.max(*c.get_num());
        }
        if let Some(r) = range.get_coordinate_end_row() {
            max_row = max_row.max(*r.get_num());
        }
    }

    let (merge_tops, merge_skips) = build_merge_maps(sheet);

    let mut rows = Vec::with_capacity(max_row as usize);
    for row_idx in 1..=max_row {
        let mut cells = Vec::new();
        for col_idx in 1..=max_col {
            if merge_skips.contains(&(col_idx, row_idx)) {
                continue;
            }

            // umya-spreadsheet tuple is (column, row), both 1-indexed
            let value = sheet
                .get_cell((col_idx, row_idx))
                .map(|cell| cell.get_value().to_string())
                .unwrap_or_default();

            let content = if value.is_empty() {
                Vec::new()
            } else {
                vec![Block::Paragraph(Paragraph::plain(value))]
            };

            let (col_span, row_span) = merge_tops
                .get(&(col_idx, row_idx))
                .map_or((1, 1), |info| (info.col_span, info.row_span));

            cells.push(TableCell {
                content,
                col_span,
                row_span,
                ..TableCell::default()
            });
        }
        rows.push(TableRow { cells });
    }

    Table { rows }
}

impl Parser for XlsxParser {
    fn parse(
        &self,
        data: &[u8],
        _options: &ViewOptions,
    ) -> Result<(Document, Vec<ConvertWarning>), ViewError> {
        // The reader has been seen to panic on truncated packages.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let book = umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(data), true)
                .map_err(|e| ViewError::parse(Stage::Xlsx, format!("Failed to parse XLSX: {e}")))?;

            let sheets = book.get_sheet_collection();
            let sheet = sheets
                .first()
                .ok_or_else(|| ViewError::parse(Stage::Xlsx, "workbook contains no sheets"))?;
            if sheets.len() > 1 {
                debug!(
                    ignored = sheets.len() - 1,
                    "rendering first sheet only"
                );
            }
            Ok((sheet.get_name().to_string(), convert_sheet(sheet)))
        }));

        let (name, table) = match outcome {
            Ok(result) => result?,
            Err(payload) => {
                return Err(ViewError::parse(
                    Stage::Xlsx,
                    format!("workbook reader failed: {}", panic_message(payload.as_ref())),
                ));
            }
        };

        Ok((
            Document {
                metadata: extract_metadata(data),
                pages: vec![Page::Table(TablePage { name, table })],
            },
            Vec::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Helper: build a minimal XLSX as bytes with a single sheet.
    fn build_xlsx_bytes(sheet_name: &str, cells: &[(&str, &str)]) -> Vec<u8> {
        build_xlsx_with_merges(sheet_name, cells, &[])
    }

    /// Helper: build XLSX with merge ranges.
    fn build_xlsx_with_merges(
        sheet_name: &str,
        cells: &[(&str, &str)],
        merges: &[&str],
    ) -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book.get_sheet_mut(&0).unwrap();
            sheet.set_name(sheet_name);
            for &(coord, value) in cells {
                sheet.get_cell_mut(coord).set_value(value);
            }
            for &merge_range in merges {
                sheet.add_merge_cells(merge_range);
            }
        }
        let mut cursor = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut cursor).unwrap();
        cursor.into_inner()
    }

    fn parse(data: &[u8]) -> Result<(Document, Vec<ConvertWarning>), ViewError> {
        XlsxParser.parse(data, &ViewOptions::default())
    }

    fn table_page(doc: &Document) -> &TablePage {
        match &doc.pages[0] {
            Page::Table(tp) => tp,
            _ => panic!("Expected TablePage"),
        }
    }

    fn cell_text(cell: &TableCell) -> String {
        cell.content
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p.text()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_single_cell() {
        let data = build_xlsx_bytes("Sheet1", &[("A1", "Hello")]);
        let (doc, warnings) = parse(&data).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(doc.pages.len(), 1);
        let tp = table_page(&doc);
        assert_eq!(tp.name, "Sheet1");
        assert_eq!(tp.table.rows.len(), 1);
        assert_eq!(tp.table.rows[0].cells.len(), 1);
        assert_eq!(cell_text(&tp.table.rows[0].cells[0]), "Hello");
    }

    #[test]
    fn test_parse_reading_order() {
        let data = build_xlsx_bytes(
            "Data",
            &[("A1", "Name"), ("B1", "Age"), ("A2", "Alice"), ("B2", "30")],
        );
        let (doc, _) = parse(&data).unwrap();

        let tp = table_page(&doc);
        let texts: Vec<String> = tp
            .table
            .rows
            .iter()
            .flat_map(|r| r.cells.iter().map(cell_text))
            .collect();
        assert_eq!(texts, ["Name", "Age", "Alice", "30"]);
    }

    #[test]
    fn test_parse_empty_cells_in_grid() {
        let data = build_xlsx_bytes("Sheet1", &[("A1", "Top-Left"), ("B2", "Bottom-Right")]);
        let (doc, _) = parse(&data).unwrap();

        let tp = table_page(&doc);
        assert_eq!(tp.table.rows.len(), 2);
        assert_eq!(tp.table.rows[0].cells.len(), 2);
        assert_eq!(cell_text(&tp.table.rows[0].cells[0]), "Top-Left");
        assert!(tp.table.rows[0].cells[1].content.is_empty());
        assert!(tp.table.rows[1].cells[0].content.is_empty());
        assert_eq!(cell_text(&tp.table.rows[1].cells[1]), "Bottom-Right");
    }

    #[test]
    fn test_only_first_sheet_is_read() {
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book.get_sheet_mut(&0).unwrap();
            sheet.set_name("First");
            sheet.get_cell_mut("A1").set_value("one");
        }
        let mut second = umya_spreadsheet::Worksheet::default();
        second.set_name("Second");
        second.get_cell_mut("A1").set_value("two");
        book.add_sheet(second).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut cursor).unwrap();

        let (doc, _) = parse(&cursor.into_inner()).unwrap();
        assert_eq!(doc.pages.len(), 1);
        let tp = table_page(&doc);
        assert_eq!(tp.name, "First");
        assert_eq!(cell_text(&tp.table.rows[0].cells[0]), "one");
    }

    #[test]
    fn test_table_row_column_consistency() {
        let data = build_xlsx_bytes(
            "Grid",
            &[("A1", "1"), ("C1", "3"), ("B2", "5"), ("C3", "9")],
        );
        let (doc, _) = parse(&data).unwrap();

        let tp = table_page(&doc);
        assert_eq!(tp.table.rows.len(), 3);
        for row in &tp.table.rows {
            assert_eq!(row.cells.len(), 3);
        }
    }

    #[test]
    fn test_parse_invalid_data_returns_error() {
        let err = parse(b"not an xlsx file").unwrap_err();
        assert!(
            matches!(err, ViewError::Parse { stage: Stage::Xlsx, .. }),
            "Expected Parse error, got {err:?}"
        );
    }

    #[test]
    fn test_parse_zip_without_workbook_is_error() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("hello.txt", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(b"hi").unwrap();
        let data = zip.finish().unwrap().into_inner();

        assert!(matches!(
            parse(&data).unwrap_err(),
            ViewError::Parse { stage: Stage::Xlsx, .. }
        ));
    }

    #[test]
    fn test_merge_colspan_and_rowspan() {
        let data = build_xlsx_with_merges(
            "Sheet1",
            &[("A1", "Big"), ("C1", "Right"), ("C2", "Below")],
            &["A1:B2"],
        );
        let (doc, _) = parse(&data).unwrap();

        let tp = table_page(&doc);
        assert_eq!(tp.table.rows[0].cells.len(), 2);
        assert_eq!(tp.table.rows[0].cells[0].col_span, 2);
        assert_eq!(tp.table.rows[0].cells[0].row_span, 2);
        assert_eq!(cell_text(&tp.table.rows[0].cells[0]), "Big");
        assert_eq!(cell_text(&tp.table.rows[0].cells[1]), "Right");
        assert_eq!(tp.table.rows[1].cells.len(), 1);
        assert_eq!(cell_text(&tp.table.rows[1].cells[0]), "Below");
    }

    #[test]
    fn test_merge_content_in_top_left_only() {
        let data = build_xlsx_with_merges(
            "Sheet1",
            &[("A1", "TopLeft"), ("B1", "should be ignored")],
            &["A1:B1"],
        );
        let (doc, _) = parse(&data).unwrap();

        let tp = table_page(&doc);
        assert_eq!(tp.table.rows[0].cells.len(), 1);
        assert_eq!(cell_text(&tp.table.rows[0].cells[0]), "TopLeft");
    }

    #[test]
    fn test_merge_wide_colspan() {
        let data = build_xlsx_with_merges("Sheet1", &[("A1", "Title")], &["A1:D1"]);
        let (doc, _) = parse(&data).unwrap();

        let tp = table_page(&doc);
        assert_eq!(tp.table.rows[0].cells.len(), 1);
        assert_eq!(tp.table.rows[0].cells[0].col_span, 4);
    }
}
