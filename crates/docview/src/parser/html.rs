//! HTML → IR.
//!
//! Used twice: to read edited HTML back before export, and to sanitize
//! untrusted fragments (parse, then re-render through the IR). Anything the IR
//! cannot express is dropped, so attributes, scripts and event handlers never
//! survive the trip.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ego_tree::iter::Edge;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use crate::config::ViewOptions;
use crate::error::{ConvertWarning, ViewError};
use crate::ir::{
    Alignment, Block, Color, Document, FlowPage, ImageData, ImageFormat, List, ListItem,
    ListKind, Metadata, Page, Paragraph, ParagraphStyle, Run, Table, TableCell, TableRow,
    TextStyle,
};
use crate::parser::Parser;
use crate::render::html_gen::safe_href;

pub struct HtmlParser;

impl Parser for HtmlParser {
    fn parse(
        &self,
        data: &[u8],
        options: &ViewOptions,
    ) -> Result<(Document, Vec<ConvertWarning>), ViewError> {
        let text = String::from_utf8_lossy(data);
        let html = Html::parse_document(&text);
        Ok(convert_html(&html, options))
    }
}

/// Parse an HTML fragment (no `<html>`/`<body>` needed) into the IR.
pub fn parse_fragment(fragment: &str, options: &ViewOptions) -> (Document, Vec<ConvertWarning>) {
    let html = Html::parse_fragment(fragment);
    convert_html(&html, options)
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn convert_html(html: &Html, options: &ViewOptions) -> (Document, Vec<ConvertWarning>) {
    let title = selector("head > title")
        .and_then(|s| html.select(&s).next())
        .map(|t| collapse_whitespace(&t.text().collect::<String>()).trim().to_string())
        .filter(|t| !t.is_empty());

    let root = selector("body")
        .and_then(|s| html.select(&s).next())
        .unwrap_or_else(|| html.root_element());

    let mut walker = Walker {
        options,
        warnings: Vec::new(),
        depth: 0,
        flattened: false,
    };
    let content = walker.blocks(root, &Inline::default());

    (
        Document {
            metadata: Metadata {
                title,
                author: None,
            },
            pages: vec![Page::Flow(FlowPage { content })],
        },
        walker.warnings,
    )
}

/// Elements dropped together with everything inside them.
fn is_discarded(tag: &str) -> bool {
    matches!(
        tag,
        "script"
            | "style"
            | "head"
            | "title"
            | "meta"
            | "link"
            | "iframe"
            | "frame"
            | "frameset"
            | "object"
            | "embed"
            | "noscript"
            | "template"
            | "svg"
            | "math"
            | "canvas"
            | "audio"
            | "video"
            | "form"
            | "input"
            | "button"
            | "select"
            | "textarea"
    )
}

fn heading_level(tag: &str) -> Option<usize> {
    match tag {
        "h1" => Some(0),
        "h2" => Some(1),
        "h3" => Some(2),
        "h4" => Some(3),
        "h5" => Some(4),
        "h6" => Some(5),
        _ => None,
    }
}

/// Elements that start a new block rather than continuing the current line.
fn is_block(tag: &str) -> bool {
    heading_level(tag).is_some()
        || matches!(
            tag,
            "p" | "div"
                | "section"
                | "article"
                | "main"
                | "header"
                | "footer"
                | "nav"
                | "aside"
                | "blockquote"
                | "pre"
                | "address"
                | "figure"
                | "figcaption"
                | "ul"
                | "ol"
                | "li"
                | "table"
                | "hr"
                | "body"
                | "html"
        )
}

/// Inherited inline state.
#[derive(Debug, Clone, Default)]
struct Inline {
    style: TextStyle,
    href: Option<String>,
    preserve_whitespace: bool,
}

/// Span limits browsers apply to `colspan` and `rowspan`.
const MAX_COLSPAN: u32 = 1000;
const MAX_ROWSPAN: u32 = 65534;

/// Element nesting the walker follows; anything deeper is kept as plain text.
const MAX_NESTING: usize = 32;

struct Walker<'a> {
    options: &'a ViewOptions,
    warnings: Vec<ConvertWarning>,
    depth: usize,
    flattened: bool,
}

/// Runs collected for the paragraph currently being built.
struct Pending {
    style: ParagraphStyle,
    runs: Vec<Run>,
}

impl Pending {
    fn new(style: ParagraphStyle) -> Self {
        Self {
            style,
            runs: Vec::new(),
        }
    }

    fn flush(&mut self, out: &mut Vec<Block>) {
        let runs = std::mem::take(&mut self.runs);
        if let Some(paragraph) = finish_paragraph(self.style.clone(), runs) {
            out.push(Block::Paragraph(paragraph));
        }
    }

    fn flush_into_paragraphs(&mut self, out: &mut Vec<Paragraph>) {
        let runs = std::mem::take(&mut self.runs);
        if let Some(paragraph) = finish_paragraph(self.style.clone(), runs) {
            out.push(paragraph);
        }
    }
}

/// Trim the paragraph edges and drop empty runs; `None` if nothing is left.
fn finish_paragraph(style: ParagraphStyle, mut runs: Vec<Run>) -> Option<Paragraph> {
    if let Some(first) = runs.first_mut() {
        first.text = first.text.trim_start_matches(' ').to_string();
    }
    if let Some(last) = runs.last_mut() {
        last.text = last.text.trim_end_matches(' ').to_string();
    }
    runs.retain(|r| !r.text.is_empty());
    let paragraph = Paragraph { style, runs };
    if paragraph.text().trim().is_empty() {
        None
    } else {
        Some(paragraph)
    }
}

impl Walker<'_> {
    /// Step one element deeper. `false` at the nesting limit; the caller must
    /// then use [`flat_text`] instead of recursing, and must not call `leave`.
    fn enter(&mut self) -> bool {
        if self.depth >= MAX_NESTING {
            if !self.flattened {
                self.flattened = true;
                debug!(limit = MAX_NESTING, "flattening deeply nested markup");
                self.warnings.push(ConvertWarning {
                    element: "Nesting".to_string(),
                    reason: format!(
                        "markup nested deeper than {MAX_NESTING} levels kept as text"
                    ),
                });
            }
            return false;
        }
        self.depth += 1;
        true
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Convert the children of a block container to blocks.
    fn blocks(&mut self, element: ElementRef, inline: &Inline) -> Vec<Block> {
        let mut out = Vec::new();
        let mut pending = Pending::new(ParagraphStyle::default());
        self.container_children(element, inline, &mut pending, &mut out);
        pending.flush(&mut out);
        out
    }

    fn container_children(
        &mut self,
        element: ElementRef,
        inline: &Inline,
        pending: &mut Pending,
        out: &mut Vec<Block>,
    ) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => push_text(&mut pending.runs, text, inline),
                Node::Element(_) => {
                    let Some(child) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let tag = child.value().name();
                    if is_discarded(tag) {
                        continue;
                    }
                    if is_block(tag) {
                        pending.flush(out);
                        self.block_element(child, inline, out);
                    } else if tag == "img" {
                        pending.flush(out);
                        if let Some(image) = self.image(child) {
                            out.push(Block::Image(image));
                        }
                    } else {
                        self.inline_element(child, inline, &mut pending.runs, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn block_element(&mut self, element: ElementRef, inline: &Inline, out: &mut Vec<Block>) {
        if !self.enter() {
            let runs = vec![text_run(flat_text(element), inline)];
            if let Some(paragraph) = finish_paragraph(ParagraphStyle::default(), runs) {
                out.push(Block::Paragraph(paragraph));
            }
            return;
        }
        self.block_contents(element, inline, out);
        self.leave();
    }

    fn block_contents(&mut self, element: ElementRef, inline: &Inline, out: &mut Vec<Block>) {
        let tag = element.value().name();
        match tag {
            "ul" | "ol" => {
                let kind = if tag == "ol" {
                    ListKind::Ordered
                } else {
                    ListKind::Unordered
                };
                let mut items = Vec::new();
                self.list_items(element, inline, 0, &mut items);
                if !items.is_empty() {
                    out.push(Block::List(List { kind, items }));
                }
            }
            "table" => {
                let table = self.table(element, inline);
                if !table.rows.is_empty() {
                    out.push(Block::Table(table));
                }
            }
            "hr" => {}
            _ => {
                let mut style = paragraph_style(element);
                style.heading_level = heading_level(tag);
                let mut child_inline = apply_element_style(element, inline);
                if tag == "pre" {
                    child_inline.preserve_whitespace = true;
                }
                let mut pending = Pending::new(style);
                self.container_children(element, &child_inline, &mut pending, out);
                pending.flush(out);
            }
        }
    }

    fn inline_element(
        &mut self,
        element: ElementRef,
        inline: &Inline,
        runs: &mut Vec<Run>,
        out: &mut Vec<Block>,
    ) {
        if element.value().name() == "br" {
            runs.push(Run {
                text: "\n".to_string(),
                style: inline.style.clone(),
                href: inline.href.clone(),
            });
            return;
        }
        if !self.enter() {
            push_text(runs, &flat_text(element), inline);
            return;
        }
        self.inline_contents(element, inline, runs, out);
        self.leave();
    }

    fn inline_contents(
        &mut self,
        element: ElementRef,
        inline: &Inline,
        runs: &mut Vec<Run>,
        out: &mut Vec<Block>,
    ) {
        let child_inline = apply_element_style(element, inline);
        for child in element.children() {
            match child.value() {
                Node::Text(text) => push_text(runs, text, &child_inline),
                Node::Element(_) => {
                    let Some(child) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let tag = child.value().name();
                    if is_discarded(tag) {
                        continue;
                    }
                    if tag == "img" {
                        if let Some(image) = self.image(child) {
                            out.push(Block::Image(image));
                        }
                    } else if is_block(tag) {
                        // Block inside inline markup: keep its text on the current line.
                        for block in self.blocks(child, &child_inline) {
                            if let Block::Paragraph(p) = block {
                                runs.extend(p.runs);
                            }
                        }
                    } else {
                        self.inline_element(child, &child_inline, runs, out);
                    }
                }
                _ => {}
            }
        }
    }

    /// Flatten `<li>` children of a list into items; nested lists go one level deeper.
    fn list_items(
        &mut self,
        list: ElementRef,
        inline: &Inline,
        level: u32,
        items: &mut Vec<ListItem>,
    ) {
        if !self.enter() {
            let runs = vec![text_run(flat_text(list), inline)];
            if let Some(paragraph) = finish_paragraph(ParagraphStyle::default(), runs) {
                items.push(ListItem {
                    content: vec![paragraph],
                    level,
                });
            }
            return;
        }
        self.list_contents(list, inline, level, items);
        self.leave();
    }

    fn list_contents(
        &mut self,
        list: ElementRef,
        inline: &Inline,
        level: u32,
        items: &mut Vec<ListItem>,
    ) {
        for li in list.children().filter_map(ElementRef::wrap) {
            match li.value().name() {
                "li" => {}
                "ul" | "ol" => {
                    self.list_items(li, inline, level + 1, items);
                    continue;
                }
                _ => continue,
            }

            let mut content = Vec::new();
            let mut nested = Vec::new();
            let mut pending = Pending::new(ParagraphStyle::default());
            for child in li.children() {
                if let Some(el) = ElementRef::wrap(child)
                    && matches!(el.value().name(), "ul" | "ol")
                {
                    pending.flush_into_paragraphs(&mut content);
                    self.list_items(el, inline, level + 1, &mut nested);
                    continue;
                }
                let mut blocks = Vec::new();
                match child.value() {
                    Node::Text(text) => push_text(&mut pending.runs, text, inline),
                    Node::Element(_) => {
                        let Some(el) = ElementRef::wrap(child) else {
                            continue;
                        };
                        let tag = el.value().name();
                        if is_discarded(tag) || tag == "img" {
                            continue;
                        }
                        if is_block(tag) {
                            pending.flush_into_paragraphs(&mut content);
                            self.block_element(el, inline, &mut blocks);
                        } else {
                            self.inline_element(el, inline, &mut pending.runs, &mut blocks);
                        }
                    }
                    _ => {}
                }
                for block in blocks {
                    if let Block::Paragraph(p) = block {
                        content.push(p);
                    }
                }
            }
            pending.flush_into_paragraphs(&mut content);

            if !content.is_empty() {
                items.push(ListItem { content, level });
            }
            items.append(&mut nested);
        }
    }

    fn table(&mut self, table: ElementRef, inline: &Inline) -> Table {
        let mut rows = Vec::new();
        for child in table.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "tr" => rows.push(self.table_row(child, inline)),
                "thead" | "tbody" | "tfoot" => {
                    for tr in child.children().filter_map(ElementRef::wrap) {
                        if tr.value().name() == "tr" {
                            rows.push(self.table_row(tr, inline));
                        }
                    }
                }
                _ => {}
            }
        }
        Table { rows }
    }

    fn table_row(&mut self, tr: ElementRef, inline: &Inline) -> TableRow {
        let mut cells = Vec::new();
        for cell in tr.children().filter_map(ElementRef::wrap) {
            let tag = cell.value().name();
            if tag != "td" && tag != "th" {
                continue;
            }
            let mut cell_inline = inline.clone();
            if tag == "th" {
                cell_inline.style.bold = Some(true);
            }
            let span = |name: &str, max: u32| {
                cell.value()
                    .attr(name)
                    .and_then(|v| v.trim().parse::<u32>().ok())
                    .filter(|&n| n >= 1)
                    .map_or(1, |n| n.min(max))
            };
            let background = cell
                .value()
                .attr("bgcolor")
                .and_then(parse_css_color)
                .or_else(|| css_property(cell, "background-color").and_then(|v| parse_css_color(&v)));
            cells.push(TableCell {
                content: self.blocks(cell, &cell_inline),
                col_span: span("colspan", MAX_COLSPAN),
                row_span: span("rowspan", MAX_ROWSPAN),
                background,
            });
        }
        TableRow { cells }
    }

    /// Only `data:` images are kept; remote sources are never fetched.
    fn image(&mut self, img: ElementRef) -> Option<ImageData> {
        if !self.options.embed_images {
            return None;
        }
        let src = img.value().attr("src").unwrap_or_default().trim();
        let Some((format, data)) = decode_data_uri(src) else {
            debug!(src = %truncate(src, 64), "dropping image without inline data");
            self.warnings.push(ConvertWarning {
                element: "Image".to_string(),
                reason: "only data: URI images can be embedded".to_string(),
            });
            return None;
        };
        let dimension = |name: &str| {
            img.value()
                .attr(name)
                .and_then(|v| v.trim().trim_end_matches("px").parse::<f64>().ok())
                .filter(|v| *v > 0.0)
                .map(px_to_pt)
        };
        Some(ImageData {
            data,
            format,
            width: dimension("width"),
            height: dimension("height"),
        })
    }
}

fn text_run(text: String, inline: &Inline) -> Run {
    Run {
        text: collapse_whitespace(&text),
        style: inline.style.clone(),
        href: None,
    }
}

/// All text under `element` except inside discarded elements, gathered
/// without recursion.
fn flat_text(element: ElementRef) -> String {
    let mut text = String::new();
    let mut skipping = 0usize;
    for edge in element.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(el) if skipping > 0 || is_discarded(el.name()) => skipping += 1,
                Node::Element(el) if el.name() == "br" => text.push(' '),
                Node::Text(t) if skipping == 0 => text.push_str(t),
                _ => {}
            },
            Edge::Close(node) => {
                if node.value().is_element() && skipping > 0 {
                    skipping -= 1;
                }
            }
        }
    }
    text
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `data:image/png;base64,....` → (format, bytes).
fn decode_data_uri(src: &str) -> Option<(ImageFormat, Vec<u8>)> {
    let rest = src.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let format = ImageFormat::from_mime(mime)?;
    let data = STANDARD.decode(payload.trim()).ok()?;
    if data.is_empty() {
        return None;
    }
    Some((format, data))
}

fn px_to_pt(px: f64) -> f64 {
    px * 0.75
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn push_text(runs: &mut Vec<Run>, text: &str, inline: &Inline) {
    let mut text = if inline.preserve_whitespace {
        text.to_string()
    } else {
        collapse_whitespace(text)
    };
    if text.is_empty() {
        return;
    }
    // Collapse spaces across run boundaries too.
    if !inline.preserve_whitespace
        && text.starts_with(' ')
        && runs
            .last()
            .is_none_or(|r| r.text.ends_with(' ') || r.text.ends_with('\n'))
    {
        text.remove(0);
        if text.is_empty() {
            return;
        }
    }
    if let Some(last) = runs.last_mut()
        && last.style == inline.style
        && last.href == inline.href
    {
        last.text.push_str(&text);
        return;
    }
    runs.push(Run {
        text,
        style: inline.style.clone(),
        href: inline.href.clone(),
    });
}

/// Declarations of the element's `style` attribute, lower-cased property names.
fn css_declarations(element: ElementRef) -> Vec<(String, String)> {
    element
        .value()
        .attr("style")
        .map(|style| {
            style
                .split(';')
                .filter_map(|decl| {
                    let (name, value) = decl.split_once(':')?;
                    let value = value.trim().trim_end_matches("!important").trim();
                    Some((name.trim().to_ascii_lowercase(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn css_property(element: ElementRef, name: &str) -> Option<String> {
    css_declarations(element)
        .into_iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

fn paragraph_style(element: ElementRef) -> ParagraphStyle {
    let alignment = css_property(element, "text-align")
        .and_then(|v| Alignment::from_css(&v))
        .or_else(|| element.value().attr("align").and_then(Alignment::from_css));
    ParagraphStyle {
        alignment,
        heading_level: None,
    }
}

/// `#RRGGBB`, `#RGB`, `rgb(r, g, b)` and a handful of named colors.
fn parse_css_color(value: &str) -> Option<Color> {
    let value = value.trim();
    if let Some(args) = value
        .strip_prefix("rgb(")
        .or_else(|| value.strip_prefix("rgba("))
        .and_then(|v| v.strip_suffix(')'))
    {
        let mut parts = args.split(',').map(|p| p.trim().parse::<u8>().ok());
        let r = parts.next()??;
        let g = parts.next()??;
        let b = parts.next()??;
        return Some(Color::new(r, g, b));
    }
    if value.starts_with('#') {
        return Color::from_hex(value);
    }
    match value.to_ascii_lowercase().as_str() {
        "black" => Some(Color::black()),
        "white" => Some(Color::new(255, 255, 255)),
        "red" => Some(Color::new(255, 0, 0)),
        "green" => Some(Color::new(0, 128, 0)),
        "blue" => Some(Color::new(0, 0, 255)),
        "yellow" => Some(Color::new(255, 255, 0)),
        "gray" | "grey" => Some(Color::new(128, 128, 128)),
        _ => None,
    }
}

/// Font size in points from `12pt`, `16px` or a bare number (points).
fn parse_font_size(value: &str) -> Option<f64> {
    let value = value.trim();
    let size = if let Some(pt) = value.strip_suffix("pt") {
        pt.trim().parse::<f64>().ok()?
    } else if let Some(px) = value.strip_suffix("px") {
        px_to_pt(px.trim().parse::<f64>().ok()?)
    } else {
        value.parse::<f64>().ok()?
    };
    (size > 0.0).then_some(size)
}

/// Inline state for the children of `element`.
fn apply_element_style(element: ElementRef, inline: &Inline) -> Inline {
    let mut next = inline.clone();
    let style = &mut next.style;
    match element.value().name() {
        "b" | "strong" => style.bold = Some(true),
        "i" | "em" | "cite" | "var" => style.italic = Some(true),
        "u" | "ins" => style.underline = Some(true),
        "s" | "strike" | "del" => style.strikethrough = Some(true),
        "font" => {
            if let Some(color) = element.value().attr("color").and_then(parse_css_color) {
                style.color = Some(color);
            }
            if let Some(face) = element.value().attr("face") {
                style.font_family = Some(face.trim().to_string());
            }
        }
        "a" => {
            next.href = element
                .value()
                .attr("href")
                .and_then(safe_href)
                .map(String::from);
        }
        _ => {}
    }

    for (name, value) in css_declarations(element) {
        let style = &mut next.style;
        match name.as_str() {
            "font-weight" => {
                style.bold = Some(
                    value == "bold" || value == "bolder" || value.parse::<u16>().is_ok_and(|w| w >= 600),
                );
            }
            "font-style" => style.italic = Some(value == "italic" || value == "oblique"),
            "text-decoration" | "text-decoration-line" => {
                if value.contains("underline") {
                    style.underline = Some(true);
                }
                if value.contains("line-through") {
                    style.strikethrough = Some(true);
                }
                if value == "none" {
                    style.underline = Some(false);
                    style.strikethrough = Some(false);
                }
            }
            "color" => {
                if let Some(color) = parse_css_color(&value) {
                    style.color = Some(color);
                }
            }
            "font-size" => {
                if let Some(size) = parse_font_size(&value) {
                    style.font_size = Some(size);
                }
            }
            "font-family" => {
                let family = value
                    .split(',')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .trim_matches(['"', '\''])
                    .to_string();
                if !family.is_empty() {
                    style.font_family = Some(family);
                }
            }
            _ => {}
        }
    }
    next
}
