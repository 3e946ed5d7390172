use std::collections::BTreeMap;
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};

use docx_rs::{
    AbstractNumbering, AlignmentType, BreakType, Docx, Hyperlink, HyperlinkType, IndentLevel,
    Level, LevelJc, LevelText, NumberFormat, Numbering, NumberingId, Numberings, Pic, RunFonts,
    Shading, Start, Style, StyleType, VMergeType,
};
use tracing::{debug, warn};

use crate::error::{ConvertWarning, ViewError, panic_message};
use crate::ir::{
    Alignment, Block, Document, ImageData, List, ListKind, Page, Paragraph, Run, Table,
    TableCell, TextStyle,
};

/// Default heading sizes in points, Heading 1 through Heading 6.
const HEADING_SIZES: [f64; 6] = [24.0, 20.0, 16.0, 14.0, 12.0, 11.0];

/// First numbering instance id; lower ids are left to the template defaults.
const FIRST_NUM_ID: usize = 10;

/// Total usable text width in twips for an A4/Letter page with 1" margins.
const TEXT_WIDTH_TWIPS: usize = 9000;

/// Widest table grid written, in columns.
const MAX_GRID_COLUMNS: usize = 1000;

/// 1 pt = 12700 EMU.
fn pt_to_emu(pt: f64) -> u32 {
    (pt * 12700.0).round().max(0.0) as u32
}

/// Serialize a Document IR as a `.docx` package.
///
/// Flow content only; table pages are written as a single table. Images the
/// `image` crate cannot decode are skipped with a warning.
pub fn generate_docx(doc: &Document) -> Result<(Vec<u8>, Vec<ConvertWarning>), ViewError> {
    let result = catch_unwind(AssertUnwindSafe(|| build_package(doc)));
    let (bytes, warnings) = match result {
        Ok(inner) => inner?,
        Err(payload) => {
            return Err(ViewError::Export(format!(
                "document writer failed: {}",
                panic_message(payload.as_ref())
            )));
        }
    };
    if bytes.is_empty() {
        return Err(ViewError::Export("writer produced an empty file".to_string()));
    }
    debug!(bytes = bytes.len(), warnings = warnings.len(), "docx package written");
    Ok((bytes, warnings))
}

fn build_package(doc: &Document) -> Result<(Vec<u8>, Vec<ConvertWarning>), ViewError> {
    let mut writer = DocxWriter::default();
    let mut body = Vec::new();
    for page in &doc.pages {
        match page {
            Page::Flow(flow) => {
                for block in &flow.content {
                    writer.block(block, &mut body);
                }
            }
            Page::Table(table_page) => {
                body.push(BodyItem::Table(writer.table(&table_page.table)));
            }
        }
    }

    let mut docx = Docx::new();
    for style in heading_styles() {
        docx = docx.add_style(style);
    }
    if !writer.lists.is_empty() {
        docx = docx.numberings(writer.numberings());
    }
    for item in body {
        docx = match item {
            BodyItem::Paragraph(p) => docx.add_paragraph(p),
            BodyItem::Table(t) => docx.add_table(t),
        };
    }

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|e| ViewError::Export(format!("failed to write package: {e}")))?;
    Ok((cursor.into_inner(), writer.warnings))
}

fn heading_styles() -> Vec<Style> {
    HEADING_SIZES
        .iter()
        .enumerate()
        .map(|(level, &size)| {
            Style::new(format!("Heading{}", level + 1), StyleType::Paragraph)
                .name(format!("heading {}", level + 1))
                .size((size * 2.0) as usize)
                .bold()
                .outline_lvl(level)
        })
        .collect()
}

enum BodyItem {
    Paragraph(docx_rs::Paragraph),
    Table(docx_rs::Table),
}

#[derive(Default)]
struct DocxWriter {
    /// One numbering instance per IR list, in order.
    lists: Vec<ListKind>,
    warnings: Vec<ConvertWarning>,
}

impl DocxWriter {
    fn block(&mut self, block: &Block, out: &mut Vec<BodyItem>) {
        match block {
            Block::Paragraph(para) => {
                if !para.is_empty() {
                    out.push(BodyItem::Paragraph(self.paragraph(para)));
                }
            }
            Block::Table(table) => out.push(BodyItem::Table(self.table(table))),
            Block::Image(image) => {
                if let Some(pic) = self.picture(image) {
                    out.push(BodyItem::Paragraph(
                        docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_image(pic)),
                    ));
                }
            }
            Block::List(list) => self.list(list, out),
        }
    }

    fn paragraph(&mut self, para: &Paragraph) -> docx_rs::Paragraph {
        let mut p = docx_rs::Paragraph::new();
        if let Some(level) = para.style.heading_level.filter(|&l| l < 6) {
            p = p.style(&format!("Heading{}", level + 1));
        }
        if let Some(alignment) = para.style.alignment {
            p = p.align(match alignment {
                Alignment::Left => AlignmentType::Left,
                Alignment::Center => AlignmentType::Center,
                Alignment::Right => AlignmentType::Right,
                Alignment::Justify => AlignmentType::Both,
            });
        }
        for run in &para.runs {
            p = add_run(p, run);
        }
        p
    }

    fn list(&mut self, list: &List, out: &mut Vec<BodyItem>) {
        let num_id = FIRST_NUM_ID + self.lists.len();
        self.lists.push(list.kind);
        for item in &list.items {
            let level = (item.level as usize).min(8);
            for para in &item.content {
                out.push(BodyItem::Paragraph(self.paragraph(para).numbering(
                    NumberingId::new(num_id),
                    IndentLevel::new(level),
                )));
            }
        }
    }

    /// Abstract definitions and instances for every list written so far.
    fn numberings(&self) -> Numberings {
        let mut nums = Numberings::new();
        for (idx, kind) in self.lists.iter().enumerate() {
            let id = FIRST_NUM_ID + idx;
            let mut abstract_num = AbstractNumbering::new(id);
            for level in 0..9 {
                let (format, text) = match kind {
                    ListKind::Unordered => ("bullet", "\u{2022}".to_string()),
                    ListKind::Ordered => ("decimal", format!("%{}.", level + 1)),
                };
                abstract_num = abstract_num.add_level(Level::new(
                    level,
                    Start::new(1),
                    NumberFormat::new(format),
                    LevelText::new(text),
                    LevelJc::new("left"),
                ));
            }
            nums = nums
                .add_abstract_numbering(abstract_num)
                .add_numbering(Numbering::new(id, id));
        }
        nums
    }

    fn table(&mut self, table: &Table) -> docx_rs::Table {
        let columns = table.column_count().clamp(1, MAX_GRID_COLUMNS);
        // Vertically merged regions still open, keyed by starting grid column.
        let mut carries: BTreeMap<usize, (u32, u32)> = BTreeMap::new();
        let mut rows = Vec::with_capacity(table.rows.len());

        for row in &table.rows {
            let mut cells = Vec::new();
            let mut col = 0usize;
            let mut pending = row.cells.iter();

            loop {
                if let Some(&(remaining, span)) = carries.get(&col)
                    && remaining > 0
                {
                    cells.push(continue_cell(span));
                    carries.insert(col, (remaining - 1, span));
                    col += span as usize;
                    continue;
                }
                let Some(cell) = pending.next() else {
                    break;
                };
                let span = cell.col_span.clamp(1, MAX_GRID_COLUMNS as u32);
                let mut out = self.cell(cell).grid_span(span as usize);
                if cell.row_span > 1 {
                    out = out.vertical_merge(VMergeType::Restart);
                    carries.insert(col, (cell.row_span - 1, span));
                }
                cells.push(out);
                col += span as usize;
            }

            // Merged regions to the right of the row's last cell.
            let trailing: Vec<usize> = carries
                .range(col..)
                .filter(|(_, (remaining, _))| *remaining > 0)
                .map(|(&c, _)| c)
                .collect();
            for c in trailing {
                if let Some((remaining, span)) = carries.get_mut(&c) {
                    cells.push(continue_cell(*span));
                    *remaining -= 1;
                }
            }
            carries.retain(|_, (remaining, _)| *remaining > 0);

            rows.push(docx_rs::TableRow::new(cells));
        }

        let width = TEXT_WIDTH_TWIPS / columns;
        docx_rs::Table::new(rows).set_grid(vec![width; columns])
    }

    fn cell(&mut self, cell: &TableCell) -> docx_rs::TableCell {
        let mut out = docx_rs::TableCell::new();
        if let Some(bg) = cell.background {
            out = out.shading(Shading::new().fill(bg.to_hex()));
        }
        let mut items = Vec::new();
        for block in &cell.content {
            self.block(block, &mut items);
        }
        // A cell must end with a paragraph.
        if !matches!(items.last(), Some(BodyItem::Paragraph(_))) {
            items.push(BodyItem::Paragraph(docx_rs::Paragraph::new()));
        }
        for item in items {
            out = match item {
                BodyItem::Paragraph(p) => out.add_paragraph(p),
                BodyItem::Table(t) => out.add_table(t),
            };
        }
        out
    }

    fn picture(&mut self, image: &ImageData) -> Option<Pic> {
        // Pic::new panics on undecodable input.
        if let Err(e) = image::load_from_memory(&image.data) {
            warn!(error = %e, "skipping undecodable image");
            self.warnings.push(ConvertWarning {
                element: "Image".to_string(),
                reason: format!("undecodable {} data: {e}", image.format.mime()),
            });
            return None;
        }
        let mut pic = Pic::new(&image.data);
        if let (Some(w), Some(h)) = (image.width, image.height) {
            pic = pic.size(pt_to_emu(w), pt_to_emu(h));
        }
        Some(pic)
    }
}

fn continue_cell(span: u32) -> docx_rs::TableCell {
    docx_rs::TableCell::new()
        .add_paragraph(docx_rs::Paragraph::new())
        .grid_span(span as usize)
        .vertical_merge(VMergeType::Continue)
}

fn add_run(p: docx_rs::Paragraph, run: &Run) -> docx_rs::Paragraph {
    let r = build_run(&run.text, &run.style);
    match run.href.as_deref() {
        Some(href) if href.starts_with('#') => {
            p.add_hyperlink(Hyperlink::new(&href[1..], HyperlinkType::Anchor).add_run(r))
        }
        Some(href) => p.add_hyperlink(Hyperlink::new(href, HyperlinkType::External).add_run(r)),
        None => p.add_run(r),
    }
}

fn build_run(text: &str, style: &TextStyle) -> docx_rs::Run {
    let mut r = docx_rs::Run::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            r = r.add_break(BreakType::TextWrapping);
        }
        for (j, segment) in line.split('\t').enumerate() {
            if j > 0 {
                r = r.add_tab();
            }
            if !segment.is_empty() {
                r = r.add_text(segment);
            }
        }
    }

    if style.bold == Some(true) {
        r = r.bold();
    }
    if style.italic == Some(true) {
        r = r.italic();
    }
    if style.underline == Some(true) {
        r = r.underline("single");
    }
    if style.strikethrough == Some(true) {
        r = r.strike();
    }
    if let Some(size) = style.font_size {
        r = r.size((size * 2.0).round() as usize);
    }
    if let Some(color) = style.color {
        r = r.color(color.to_hex());
    }
    if let Some(ref family) = style.font_family {
        r = r.fonts(RunFonts::new().ascii(family).hi_ansi(family));
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewOptions;
    use crate::ir::*;
    use crate::parser::Parser;
    use crate::parser::docx::DocxParser;

    fn roundtrip(doc: &Document) -> Document {
        let (bytes, _) = generate_docx(doc).unwrap();
        DocxParser.parse(&bytes, &ViewOptions::default()).unwrap().0
    }

    fn blocks(doc: &Document) -> Vec<Block> {
        doc.flow_blocks().cloned().collect()
    }

    #[test]
    fn test_empty_document_still_produces_package() {
        let (bytes, warnings) = generate_docx(&Document::flow(vec![])).unwrap();
        assert!(bytes.starts_with(b"PK"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_paragraph_text_and_style_survive() {
        let doc = Document::flow(vec![Block::Paragraph(Paragraph {
            style: ParagraphStyle {
                alignment: Some(Alignment::Right),
                heading_level: None,
            },
            runs: vec![Run {
                text: "Bold red".to_string(),
                style: TextStyle {
                    bold: Some(true),
                    color: Some(Color::new(255, 0, 0)),
                    font_size: Some(13.0),
                    ..TextStyle::default()
                },
                href: None,
            }],
        })]);
        let back = blocks(&roundtrip(&doc));
        let Block::Paragraph(p) = &back[0] else {
            panic!("Expected Paragraph");
        };
        assert_eq!(p.text(), "Bold red");
        assert_eq!(p.style.alignment, Some(Alignment::Right));
        assert_eq!(p.runs[0].style.bold, Some(true));
        assert_eq!(p.runs[0].style.color, Some(Color::new(255, 0, 0)));
        assert_eq!(p.runs[0].style.font_size, Some(13.0));
    }

    #[test]
    fn test_heading_level_survives() {
        let doc = Document::flow(vec![Block::Paragraph(Paragraph {
            style: ParagraphStyle {
                alignment: None,
                heading_level: Some(2),
            },
            runs: vec![Run::plain("Section")],
        })]);
        let back = blocks(&roundtrip(&doc));
        let Block::Paragraph(p) = &back[0] else {
            panic!("Expected Paragraph");
        };
        assert_eq!(p.style.heading_level, Some(2));
    }

    #[test]
    fn test_hyperlink_survives() {
        let mut run = Run::plain("link");
        run.href = Some("https://example.com".to_string());
        let doc = Document::flow(vec![Block::Paragraph(Paragraph {
            style: ParagraphStyle::default(),
            runs: vec![run],
        })]);
        let back = blocks(&roundtrip(&doc));
        let Block::Paragraph(p) = &back[0] else {
            panic!("Expected Paragraph");
        };
        assert_eq!(p.runs[0].href.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_list_kinds_and_levels_survive() {
        let doc = Document::flow(vec![
            Block::List(List {
                kind: ListKind::Unordered,
                items: vec![
                    ListItem {
                        content: vec![Paragraph::plain("a")],
                        level: 0,
                    },
                    ListItem {
                        content: vec![Paragraph::plain("a.1")],
                        level: 1,
                    },
                ],
            }),
            Block::List(List {
                kind: ListKind::Ordered,
                items: vec![ListItem {
                    content: vec![Paragraph::plain("one")],
                    level: 0,
                }],
            }),
        ]);
        let back = blocks(&roundtrip(&doc));
        assert_eq!(back.len(), 2);
        let Block::List(first) = &back[0] else {
            panic!("Expected List");
        };
        assert_eq!(first.kind, ListKind::Unordered);
        assert_eq!(first.items[1].level, 1);
        let Block::List(second) = &back[1] else {
            panic!("Expected List");
        };
        assert_eq!(second.kind, ListKind::Ordered);
    }

    fn text_cell(text: &str) -> TableCell {
        TableCell {
            content: vec![Block::Paragraph(Paragraph::plain(text))],
            ..TableCell::default()
        }
    }

    #[test]
    fn test_table_spans_survive() {
        let table = Table {
            rows: vec![
                TableRow {
                    cells: vec![
                        TableCell {
                            row_span: 2,
                            ..text_cell("tall")
                        },
                        TableCell {
                            col_span: 2,
                            ..text_cell("wide")
                        },
                    ],
                },
                TableRow {
                    cells: vec![text_cell("b"), text_cell("c")],
                },
            ],
        };
        let back = blocks(&roundtrip(&Document::flow(vec![Block::Table(table)])));
        let Block::Table(t) = &back[0] else {
            panic!("Expected Table");
        };
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0].cells[0].row_span, 2);
        assert_eq!(t.rows[0].cells[1].col_span, 2);
        assert_eq!(t.rows[1].cells.len(), 2);
    }

    #[test]
    fn test_rowspan_in_last_column() {
        let table = Table {
            rows: vec![
                TableRow {
                    cells: vec![
                        text_cell("a"),
                        TableCell {
                            row_span: 3,
                            ..text_cell("side")
                        },
                    ],
                },
                TableRow {
                    cells: vec![text_cell("b")],
                },
                TableRow {
                    cells: vec![text_cell("c")],
                },
            ],
        };
        let back = blocks(&roundtrip(&Document::flow(vec![Block::Table(table)])));
        let Block::Table(t) = &back[0] else {
            panic!("Expected Table");
        };
        assert_eq!(t.rows[0].cells[1].row_span, 3);
        assert_eq!(t.rows[2].cells.len(), 1);
    }

    #[test]
    fn test_oversized_column_span_capped() {
        let table = Table {
            rows: vec![TableRow {
                cells: vec![TableCell {
                    col_span: u32::MAX,
                    ..text_cell("wide")
                }],
            }],
        };
        let back = blocks(&roundtrip(&Document::flow(vec![Block::Table(table)])));
        let Block::Table(t) = &back[0] else {
            panic!("Expected Table");
        };
        assert_eq!(t.rows[0].cells[0].col_span, MAX_GRID_COLUMNS as u32);
    }

    #[test]
    fn test_invalid_image_skipped_with_warning() {
        let doc = Document::flow(vec![
            Block::Image(ImageData {
                data: vec![0, 1, 2, 3],
                format: ImageFormat::Png,
                width: None,
                height: None,
            }),
            Block::Paragraph(Paragraph::plain("after")),
        ]);
        let (bytes, warnings) = generate_docx(&doc).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_run_line_breaks_and_tabs() {
        let doc = Document::flow(vec![Block::Paragraph(Paragraph::plain("a\tb\nc"))]);
        let back = blocks(&roundtrip(&doc));
        let Block::Paragraph(p) = &back[0] else {
            panic!("Expected Paragraph");
        };
        assert_eq!(p.text(), "a\tb\nc");
    }
}
