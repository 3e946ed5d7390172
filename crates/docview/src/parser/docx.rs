use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

use crate::config::ViewOptions;
use crate::error::{ConvertWarning, Stage, ViewError, panic_message};
use crate::ir::{
    Alignment, Block, Color, Document, FlowPage, ImageData, ImageFormat, List, ListItem,
    ListKind, Page, Paragraph, ParagraphStyle, Run, Table, TableCell, TableRow, TextStyle,
};
use crate::parser::Parser;
use crate::parser::metadata::extract_metadata;

pub struct DocxParser;

/// Map from relationship ID → PNG image bytes.
type ImageMap = HashMap<String, Vec<u8>>;

/// Map from relationship ID → hyperlink URL.
type HyperlinkMap = HashMap<String, String>;

/// Read-only lookups shared by every body element.
struct Context<'a> {
    images: ImageMap,
    hyperlinks: HyperlinkMap,
    styles: StyleMap,
    options: &'a ViewOptions,
}

/// The reader stores hyperlinks as `(rid, url, type)` in `docx.hyperlinks`.
fn build_hyperlink_map(docx: &docx_rs::Docx) -> HyperlinkMap {
    docx.hyperlinks
        .iter()
        .map(|(rid, url, _type)| (rid.clone(), url.clone()))
        .collect()
}

/// docx-rs converts all images to PNG; we use the PNG bytes.
fn build_image_map(docx: &docx_rs::Docx) -> ImageMap {
    docx.images
        .iter()
        .map(|(id, _path, _image, png)| (id.clone(), png.0.clone()))
        .collect()
}

/// Convert EMU (English Metric Units) to points.
/// 1 inch = 914400 EMU, 1 inch = 72 points, so 1 pt = 12700 EMU.
fn emu_to_pt(emu: u32) -> f64 {
    emu as f64 / 12700.0
}

/// Numbering info extracted from a paragraph's numPr.
#[derive(Debug, Clone)]
struct NumInfo {
    num_id: usize,
    level: u32,
}

/// Map from numId → ListKind, resolved through abstractNumId.
type NumKindMap = HashMap<usize, ListKind>;

fn build_num_kind_map(numberings: &docx_rs::Numberings) -> NumKindMap {
    let mut abstract_kinds: HashMap<usize, ListKind> = HashMap::new();
    for abs in &numberings.abstract_nums {
        let kind = if abs.levels.iter().any(|lvl| {
            let json = serde_json::to_value(&lvl.format).ok();
            json.and_then(|j| j.as_str().map(|s| s.to_owned()))
                .is_some_and(|val| val == "bullet")
        }) {
            ListKind::Unordered
        } else {
            ListKind::Ordered
        };
        abstract_kinds.insert(abs.id, kind);
    }

    let mut map = NumKindMap::new();
    for num in &numberings.numberings {
        if let Some(&kind) = abstract_kinds.get(&num.abstract_num_id) {
            map.insert(num.id, kind);
        }
    }
    map
}

fn extract_num_info(para: &docx_rs::Paragraph) -> Option<NumInfo> {
    if !para.has_numbering {
        return None;
    }
    let np = para.property.numbering_property.as_ref()?;
    let num_id = np.id.as_ref()?.id;
    let level = np.level.as_ref().map_or(0, |l| l.val as u32);
    // numId 0 means "no numbering" in OOXML
    if num_id == 0 {
        return None;
    }
    Some(NumInfo { num_id, level })
}

/// Formatting carried by a paragraph style definition.
struct ResolvedStyle {
    text: TextStyle,
    paragraph: ParagraphStyle,
}

/// Map from style_id → resolved formatting.
type StyleMap = HashMap<String, ResolvedStyle>;

fn build_style_map(styles: &docx_rs::Styles) -> StyleMap {
    let mut map = StyleMap::new();
    for style in &styles.styles {
        if style.style_type != docx_rs::StyleType::Paragraph {
            continue;
        }

        let name = serde_json::to_value(&style.name)
            .ok()
            .and_then(|j| j.as_str().map(String::from))
            .unwrap_or_default();
        let mut paragraph = extract_paragraph_style(&style.paragraph_property);
        paragraph.heading_level = style
            .paragraph_property
            .outline_lvl
            .as_ref()
            .map(|ol| ol.v)
            .filter(|&v| v < 6)
            .or_else(|| heading_level_from_name(&style.style_id))
            .or_else(|| heading_level_from_name(&name));

        map.insert(
            style.style_id.clone(),
            ResolvedStyle {
                text: extract_run_style(&style.run_property),
                paragraph,
            },
        );
    }
    map
}

/// `Heading1`, `heading 3`, `Heading6` → 0-based level.
fn heading_level_from_name(name: &str) -> Option<usize> {
    let lower = name.to_ascii_lowercase();
    let digits = lower.strip_prefix("heading")?.trim_start();
    match digits.parse::<usize>() {
        Ok(n @ 1..=6) => Some(n - 1),
        _ => None,
    }
}

/// Explicit run formatting takes priority over the paragraph style.
fn merge_text_style(explicit: &TextStyle, style: Option<&ResolvedStyle>) -> TextStyle {
    let Some(base) = style.map(|s| &s.text) else {
        return explicit.clone();
    };
    TextStyle {
        font_family: explicit
            .font_family
            .clone()
            .or_else(|| base.font_family.clone()),
        font_size: explicit.font_size.or(base.font_size),
        bold: explicit.bold.or(base.bold),
        italic: explicit.italic.or(base.italic),
        underline: explicit.underline.or(base.underline),
        strikethrough: explicit.strikethrough.or(base.strikethrough),
        color: explicit.color.or(base.color),
    }
}

fn merge_paragraph_style(
    explicit: &ParagraphStyle,
    style: Option<&ResolvedStyle>,
) -> ParagraphStyle {
    let Some(base) = style.map(|s| &s.paragraph) else {
        return explicit.clone();
    };
    ParagraphStyle {
        alignment: explicit.alignment.or(base.alignment),
        heading_level: explicit.heading_level.or(base.heading_level),
    }
}

/// An intermediate element that carries optional numbering info alongside blocks.
enum TaggedElement {
    Plain(Vec<Block>),
    ListParagraph { info: NumInfo, paragraph: Paragraph },
}

/// Group consecutive list paragraphs (with the same numId) into List blocks.
fn group_into_lists(elements: Vec<TaggedElement>, num_kinds: &NumKindMap) -> Vec<Block> {
    let mut result: Vec<Block> = Vec::new();
    let mut current_list: Option<(usize, Vec<ListItem>)> = None;

    let flush = |num_id: usize, items: Vec<ListItem>, out: &mut Vec<Block>| {
        let kind = num_kinds
            .get(&num_id)
            .copied()
            .unwrap_or(ListKind::Unordered);
        out.push(Block::List(List { kind, items }));
    };

    for elem in elements {
        match elem {
            TaggedElement::ListParagraph { info, paragraph } => {
                let item = ListItem {
                    content: vec![paragraph],
                    level: info.level,
                };
                match current_list.as_mut() {
                    Some((cur_num_id, items)) if *cur_num_id == info.num_id => {
                        items.push(item);
                    }
                    _ => {
                        if let Some((num_id, items)) = current_list.take() {
                            flush(num_id, items, &mut result);
                        }
                        current_list = Some((info.num_id, vec![item]));
                    }
                }
            }
            TaggedElement::Plain(blocks) => {
                if let Some((num_id, items)) = current_list.take() {
                    flush(num_id, items, &mut result);
                }
                result.extend(blocks);
            }
        }
    }

    if let Some((num_id, items)) = current_list {
        flush(num_id, items, &mut result);
    }

    result
}

impl Parser for DocxParser {
    fn parse(
        &self,
        data: &[u8],
        options: &ViewOptions,
    ) -> Result<(Document, Vec<ConvertWarning>), ViewError> {
        let docx = catch_unwind(AssertUnwindSafe(|| docx_rs::read_docx(data)))
            .map_err(|payload| {
                ViewError::parse(
                    Stage::Docx,
                    format!("document reader failed: {}", panic_message(payload.as_ref())),
                )
            })?
            .map_err(|e| ViewError::parse(Stage::Docx, format!("Failed to parse DOCX: {e}")))?;

        let ctx = Context {
            images: build_image_map(&docx),
            hyperlinks: build_hyperlink_map(&docx),
            styles: build_style_map(&docx.styles),
            options,
        };
        let num_kinds = build_num_kind_map(&docx.numberings);
        let mut warnings = Vec::new();

        let mut elements: Vec<TaggedElement> = Vec::new();
        for (idx, child) in docx.document.children.iter().enumerate() {
            let result = catch_unwind(AssertUnwindSafe(|| match child {
                docx_rs::DocumentChild::Paragraph(para) => {
                    vec![convert_paragraph_element(para, &ctx)]
                }
                docx_rs::DocumentChild::Table(table) => {
                    vec![TaggedElement::Plain(vec![Block::Table(convert_table(
                        table, &ctx,
                    ))])]
                }
                docx_rs::DocumentChild::StructuredDataTag(sdt) => convert_sdt_children(sdt, &ctx),
                _ => Vec::new(),
            }));

            match result {
                Ok(elems) => elements.extend(elems),
                Err(payload) => {
                    let warning = ConvertWarning {
                        element: format!("Document element at index {idx}"),
                        reason: format!(
                            "element processing panicked ({}); skipped",
                            panic_message(payload.as_ref())
                        ),
                    };
                    warn!(%warning, "skipping document element");
                    warnings.push(warning);
                }
            }
        }

        let content = group_into_lists(elements, &num_kinds);

        Ok((
            Document {
                metadata: extract_metadata(data),
                pages: vec![Page::Flow(FlowPage { content })],
            },
            warnings,
        ))
    }
}

fn convert_sdt_children(sdt: &docx_rs::StructuredDataTag, ctx: &Context) -> Vec<TaggedElement> {
    let mut result = Vec::new();
    for child in &sdt.children {
        match child {
            docx_rs::StructuredDataTagChild::Paragraph(para) => {
                result.push(convert_paragraph_element(para, ctx));
            }
            docx_rs::StructuredDataTagChild::Table(table) => {
                result.push(TaggedElement::Plain(vec![Block::Table(convert_table(
                    table, ctx,
                ))]));
            }
            docx_rs::StructuredDataTagChild::StructuredDataTag(nested) => {
                result.extend(convert_sdt_children(nested, ctx));
            }
            _ => {}
        }
    }
    result
}

/// Convert a paragraph into a TaggedElement.
///
/// A numbered paragraph becomes a `ListParagraph` unless it also carries
/// images, in which case it is kept as plain blocks in document order.
fn convert_paragraph_element(para: &docx_rs::Paragraph, ctx: &Context) -> TaggedElement {
    let mut blocks = Vec::new();
    convert_paragraph_blocks(para, &mut blocks, ctx);

    let Some(info) = extract_num_info(para) else {
        return TaggedElement::Plain(blocks);
    };
    if blocks.len() != 1 {
        return TaggedElement::Plain(blocks);
    }
    match blocks.pop() {
        Some(Block::Paragraph(paragraph)) => TaggedElement::ListParagraph { info, paragraph },
        Some(other) => TaggedElement::Plain(vec![other]),
        None => TaggedElement::Plain(Vec::new()),
    }
}

/// Convert a paragraph to IR blocks. Inline images are emitted before the
/// paragraph; a paragraph without text produces no paragraph block.
fn convert_paragraph_blocks(para: &docx_rs::Paragraph, out: &mut Vec<Block>, ctx: &Context) {
    let resolved_style = para
        .property
        .style
        .as_ref()
        .and_then(|s| ctx.styles.get(s.val.as_str()));

    let mut runs: Vec<Run> = Vec::new();

    let mut push_run = |run: &docx_rs::Run, href: Option<String>, out: &mut Vec<Block>| {
        for run_child in &run.children {
            if let docx_rs::RunChild::Drawing(drawing) = run_child
                && ctx.options.embed_images
                && let Some(image) = extract_drawing_image(drawing, &ctx.images)
            {
                out.push(Block::Image(image));
            }
        }
        let text = extract_run_text(run);
        if !text.is_empty() {
            let explicit_style = extract_run_style(&run.run_property);
            runs.push(Run {
                text,
                style: merge_text_style(&explicit_style, resolved_style),
                href,
            });
        }
    };

    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run(run, None, out),
            docx_rs::ParagraphChild::Hyperlink(hyperlink) => {
                let href = resolve_hyperlink_url(hyperlink, &ctx.hyperlinks);
                for hchild in &hyperlink.children {
                    if let docx_rs::ParagraphChild::Run(run) = hchild {
                        push_run(run, href.clone(), out);
                    }
                }
            }
            _ => {}
        }
    }

    let paragraph = Paragraph {
        style: merge_paragraph_style(&extract_paragraph_style(&para.property), resolved_style),
        runs,
    };
    if !paragraph.is_empty() {
        out.push(Block::Paragraph(paragraph));
    }
}

fn extract_drawing_image(drawing: &docx_rs::Drawing, images: &ImageMap) -> Option<ImageData> {
    let pic = match &drawing.data {
        Some(docx_rs::DrawingData::Pic(pic)) => pic,
        _ => return None,
    };
    let data = images.get(&pic.id)?;

    let (w_emu, h_emu) = pic.size;
    Some(ImageData {
        data: data.clone(),
        format: ImageFormat::Png,
        width: (w_emu > 0).then(|| emu_to_pt(w_emu)),
        height: (h_emu > 0).then(|| emu_to_pt(h_emu)),
    })
}

fn extract_paragraph_style(prop: &docx_rs::ParagraphProperty) -> ParagraphStyle {
    let alignment = prop.alignment.as_ref().and_then(|j| match j.val.as_str() {
        "center" => Some(Alignment::Center),
        "right" | "end" => Some(Alignment::Right),
        "left" | "start" => Some(Alignment::Left),
        "both" | "justified" => Some(Alignment::Justify),
        _ => None,
    });
    ParagraphStyle {
        alignment,
        heading_level: None,
    }
}

fn convert_table(table: &docx_rs::Table, ctx: &Context) -> Table {
    let raw_rows = extract_raw_rows(table, ctx);
    Table {
        rows: resolve_vmerge_and_build_rows(raw_rows),
    }
}

/// Intermediate cell representation for vmerge resolution.
struct RawCell {
    content: Vec<Block>,
    col_span: u32,
    col_index: usize,
    vmerge: Option<String>, // "restart", "continue", or None
    background: Option<Color>,
}

fn extract_raw_rows(table: &docx_rs::Table, ctx: &Context) -> Vec<Vec<RawCell>> {
    let mut raw_rows = Vec::new();

    for table_child in &table.rows {
        let docx_rs::TableChild::TableRow(row) = table_child;
        let mut cells = Vec::new();
        let mut col_index: usize = 0;

        for row_child in &row.cells {
            let docx_rs::TableRowChild::TableCell(cell) = row_child;

            let prop_json = serde_json::to_value(&cell.property).ok();
            let grid_span = prop_json
                .as_ref()
                .and_then(|j| j.get("gridSpan"))
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;
            let vmerge = prop_json
                .as_ref()
                .and_then(|j| j.get("verticalMerge"))
                .and_then(|v| v.as_str())
                .map(String::from);
            let background = prop_json
                .as_ref()
                .and_then(|j| j.get("shading"))
                .and_then(extract_cell_shading);

            cells.push(RawCell {
                content: extract_cell_content(cell, ctx),
                col_span: grid_span,
                col_index,
                vmerge,
                background,
            });

            col_index += grid_span as usize;
        }

        raw_rows.push(cells);
    }

    raw_rows
}

/// Resolve vertical merges: compute rowspan for "restart" cells and skip "continue" cells.
fn resolve_vmerge_and_build_rows(raw_rows: Vec<Vec<RawCell>>) -> Vec<TableRow> {
    let spans: Vec<Vec<u32>> = raw_rows
        .iter()
        .enumerate()
        .map(|(row_idx, row)| {
            row.iter()
                .map(|cell| match cell.vmerge.as_deref() {
                    Some("restart") => count_vmerge_span(&raw_rows, row_idx, cell.col_index),
                    _ => 1,
                })
                .collect()
        })
        .collect();

    raw_rows
        .into_iter()
        .zip(spans)
        .map(|(raw_row, row_spans)| TableRow {
            cells: raw_row
                .into_iter()
                .zip(row_spans)
                .filter(|(cell, _)| cell.vmerge.as_deref() != Some("continue"))
                .map(|(cell, row_span)| TableCell {
                    content: cell.content,
                    col_span: cell.col_span,
                    row_span,
                    background: cell.background,
                })
                .collect(),
        })
        .collect()
}

/// Looks at rows below `start_row` for "continue" cells at the same column index.
fn count_vmerge_span(raw_rows: &[Vec<RawCell>], start_row: usize, col_index: usize) -> u32 {
    let mut span = 1u32;
    for row in raw_rows.iter().skip(start_row + 1) {
        let has_continue = row
            .iter()
            .any(|c| c.col_index == col_index && c.vmerge.as_deref() == Some("continue"));
        if has_continue {
            span += 1;
        } else {
            break;
        }
    }
    span
}

fn extract_cell_content(cell: &docx_rs::TableCell, ctx: &Context) -> Vec<Block> {
    let mut blocks = Vec::new();
    for content in &cell.children {
        match content {
            docx_rs::TableCellContent::Paragraph(para) => {
                convert_paragraph_blocks(para, &mut blocks, ctx);
            }
            docx_rs::TableCellContent::Table(nested_table) => {
                blocks.push(Block::Table(convert_table(nested_table, ctx)));
            }
            _ => {}
        }
    }
    blocks
}

fn extract_cell_shading(shading_json: &serde_json::Value) -> Option<Color> {
    let fill = shading_json.get("fill").and_then(|v| v.as_str())?;
    // auto and white are the same as no fill
    if fill == "auto" || fill.eq_ignore_ascii_case("FFFFFF") {
        return None;
    }
    Color::from_hex(fill)
}

/// Extract inline text style from a docx-rs RunProperty.
///
/// docx-rs types with private fields serialize directly as their inner value
/// (e.g. Bold → `true`, Sz → `24`, Color → `"FF0000"`), not as `{"val": ...}`.
fn extract_run_style(rp: &docx_rs::RunProperty) -> TextStyle {
    TextStyle {
        bold: extract_bool_prop(&rp.bold),
        italic: extract_bool_prop(&rp.italic),
        underline: rp.underline.as_ref().and_then(|u| {
            let json = serde_json::to_value(u).ok()?;
            let val = json.as_str()?;
            if val == "none" { None } else { Some(true) }
        }),
        strikethrough: rp.strike.as_ref().map(|s| s.val),
        font_size: rp.sz.as_ref().and_then(|sz| {
            let json = serde_json::to_value(sz).ok()?;
            let half_points = json.as_f64()?;
            Some(half_points / 2.0)
        }),
        color: rp.color.as_ref().and_then(|c| {
            let json = serde_json::to_value(c).ok()?;
            let hex = json.as_str()?;
            if hex == "auto" {
                return None;
            }
            Color::from_hex(hex)
        }),
        font_family: rp.fonts.as_ref().and_then(|f| {
            let json = serde_json::to_value(f).ok()?;
            json.get("ascii")
                .or_else(|| json.get("hi_ansi"))
                .or_else(|| json.get("east_asia"))
                .or_else(|| json.get("cs"))
                .and_then(|v| v.as_str())
                .map(String::from)
        }),
    }
}

fn extract_bool_prop<T: serde::Serialize>(prop: &Option<T>) -> Option<bool> {
    prop.as_ref().and_then(|p| {
        let json = serde_json::to_value(p).ok()?;
        json.as_bool()
    })
}

/// Anchor hyperlinks (internal bookmarks) resolve to `None`.
fn resolve_hyperlink_url(
    hyperlink: &docx_rs::Hyperlink,
    hyperlinks: &HyperlinkMap,
) -> Option<String> {
    match &hyperlink.link {
        docx_rs::HyperlinkData::External { rid, path } => {
            // path is populated when writing, the relationship map when reading
            if !path.is_empty() {
                Some(path.clone())
            } else {
                hyperlinks.get(rid).cloned()
            }
        }
        docx_rs::HyperlinkData::Anchor { .. } => None,
    }
}

fn extract_run_text(run: &docx_rs::Run) -> String {
    let mut text = String::new();
    for child in &run.children {
        match child {
            docx_rs::RunChild::Text(t) => text.push_str(&t.text),
            docx_rs::RunChild::Tab(_) => text.push('\t'),
            docx_rs::RunChild::Break(_) => text.push('\n'),
            _ => {}
        }
    }
    text
}
