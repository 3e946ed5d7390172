use std::fmt::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::ir::{
    Block, Document, ImageData, List, ListKind, Page, Paragraph, ParagraphStyle, Run, Table,
    TableCell, TextStyle,
};

/// Generate an HTML fragment from a Document IR.
///
/// All text and attribute values are escaped; only markup produced here ever
/// reaches the output.
pub fn generate_html(doc: &Document) -> String {
    let mut out = String::new();
    for page in &doc.pages {
        match page {
            Page::Flow(flow) => generate_blocks(&mut out, &flow.content),
            Page::Table(table_page) => generate_table(&mut out, &table_page.table),
        }
    }
    out
}

/// Wrap a fragment in a minimal standalone document.
pub fn wrap_document_shell(fragment: &str, title: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{}</body></html>",
        escape_html(title),
        fragment
    )
}

/// The href if it uses an allowed scheme (`http`, `https`, `mailto`) or is an
/// in-document `#fragment`.
pub(crate) fn safe_href(href: &str) -> Option<&str> {
    let href = href.trim();
    if href.starts_with('#') && href.len() > 1 {
        return Some(href);
    }
    let (scheme, rest) = href.split_once(':')?;
    let allowed = ["http", "https", "mailto"]
        .iter()
        .any(|s| scheme.eq_ignore_ascii_case(s));
    (allowed && !rest.is_empty()).then_some(href)
}

fn generate_blocks(out: &mut String, blocks: &[Block]) {
    for block in blocks {
        match block {
            Block::Paragraph(para) => generate_paragraph(out, para),
            Block::Table(table) => generate_table(out, table),
            Block::Image(image) => generate_image(out, image),
            Block::List(list) => generate_list(out, list),
        }
    }
}

fn generate_paragraph(out: &mut String, para: &Paragraph) {
    if para.is_empty() {
        return;
    }
    let tag = paragraph_tag(&para.style);
    out.push('<');
    out.push_str(&tag);
    write_paragraph_attrs(out, &para.style);
    out.push('>');
    generate_runs(out, &para.runs);
    let _ = writeln!(out, "</{tag}>");
}

fn paragraph_tag(style: &ParagraphStyle) -> String {
    match style.heading_level {
        Some(level) if level < 6 => format!("h{}", level + 1),
        _ => "p".to_string(),
    }
}

fn write_paragraph_attrs(out: &mut String, style: &ParagraphStyle) {
    if let Some(alignment) = style.alignment {
        let _ = write!(out, " style=\"text-align: {}\"", alignment.css());
    }
}

fn generate_runs(out: &mut String, runs: &[Run]) {
    for run in runs {
        generate_run(out, run);
    }
}

fn generate_run(out: &mut String, run: &Run) {
    if run.text.is_empty() {
        return;
    }
    let style = &run.style;
    let href = run.href.as_deref().and_then(safe_href);

    // Wrap outermost first; closed in reverse order.
    let mut closers: Vec<&str> = Vec::new();
    if let Some(href) = href {
        let _ = write!(out, "<a href=\"{}\">", escape_html(href));
        closers.push("</a>");
    }
    if let Some(css) = span_css(style) {
        let _ = write!(out, "<span style=\"{}\">", escape_html(&css));
        closers.push("</span>");
    }
    for (on, open, close) in [
        (style.bold, "<strong>", "</strong>"),
        (style.italic, "<em>", "</em>"),
        (style.underline, "<u>", "</u>"),
        (style.strikethrough, "<s>", "</s>"),
    ] {
        if on == Some(true) {
            out.push_str(open);
            closers.push(close);
        }
    }

    out.push_str(&escape_text(&run.text));

    for close in closers.iter().rev() {
        out.push_str(close);
    }
}

/// Inline CSS for properties without a dedicated element.
fn span_css(style: &TextStyle) -> Option<String> {
    let mut decls = Vec::new();
    if let Some(color) = style.color {
        decls.push(format!("color: #{}", color.to_hex()));
    }
    if let Some(size) = style.font_size {
        decls.push(format!("font-size: {}pt", format_f64(size)));
    }
    if let Some(ref family) = style.font_family {
        let family: String = family
            .chars()
            .filter(|c| !matches!(c, '"' | '\'' | ';' | '<' | '>' | '\\'))
            .collect();
        if !family.trim().is_empty() {
            decls.push(format!("font-family: '{}'", family.trim()));
        }
    }
    if decls.is_empty() {
        None
    } else {
        Some(decls.join("; "))
    }
}

fn generate_image(out: &mut String, image: &ImageData) {
    let _ = write!(
        out,
        "<img src=\"data:{};base64,{}\"",
        image.format.mime(),
        STANDARD.encode(&image.data)
    );
    if let Some(width) = image.width {
        let _ = write!(out, " width=\"{}\"", format_f64(pt_to_px(width)));
    }
    if let Some(height) = image.height {
        let _ = write!(out, " height=\"{}\"", format_f64(pt_to_px(height)));
    }
    out.push_str(">\n");
}

fn pt_to_px(pt: f64) -> f64 {
    (pt / 0.75 * 100.0).round() / 100.0
}

fn list_tag(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Ordered => "ol",
        ListKind::Unordered => "ul",
    }
}

/// Emit a flat, levelled item list as nested `<ul>`/`<ol>` elements.
///
/// A nested list always lives inside the preceding `<li>`; a level jump of
/// more than one opens empty items to hold the intermediate lists.
fn generate_list(out: &mut String, list: &List) {
    if list.items.is_empty() {
        return;
    }
    let tag = list_tag(list.kind);
    let _ = write!(out, "<{tag}>");
    // li_open[d] is true while an <li> at depth d is unclosed.
    let mut li_open = vec![false];

    for item in &list.items {
        let target = item.level as usize;
        while li_open.len() - 1 < target {
            let depth = li_open.len() - 1;
            if !li_open[depth] {
                out.push_str("<li>");
                li_open[depth] = true;
            }
            let _ = write!(out, "<{tag}>");
            li_open.push(false);
        }
        while li_open.len() - 1 > target {
            if li_open.pop() == Some(true) {
                out.push_str("</li>");
            }
            let _ = write!(out, "</{tag}>");
        }
        let depth = li_open.len() - 1;
        if li_open[depth] {
            out.push_str("</li>");
        }
        out.push_str("<li>");
        li_open[depth] = true;
        generate_item_content(out, &item.content);
    }

    while let Some(open) = li_open.pop() {
        if open {
            out.push_str("</li>");
        }
        let _ = write!(out, "</{tag}>");
    }
    out.push('\n');
}

/// A lone unstyled paragraph is written inline; anything else as blocks.
fn generate_item_content(out: &mut String, content: &[Paragraph]) {
    match content {
        [single] if single.style == ParagraphStyle::default() => generate_runs(out, &single.runs),
        _ => {
            for para in content {
                generate_paragraph(out, para);
            }
        }
    }
}

fn generate_table(out: &mut String, table: &Table) {
    out.push_str("<table>\n");
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in &row.cells {
            generate_cell(out, cell);
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
}

fn generate_cell(out: &mut String, cell: &TableCell) {
    out.push_str("<td");
    if cell.col_span > 1 {
        let _ = write!(out, " colspan=\"{}\"", cell.col_span);
    }
    if cell.row_span > 1 {
        let _ = write!(out, " rowspan=\"{}\"", cell.row_span);
    }
    if let Some(bg) = cell.background {
        let _ = write!(out, " style=\"background-color: #{}\"", bg.to_hex());
    }
    out.push('>');
    match cell.content.as_slice() {
        [Block::Paragraph(p)] if p.style == ParagraphStyle::default() => {
            generate_runs(out, &p.runs);
        }
        blocks => generate_blocks(out, blocks),
    }
    out.push_str("</td>");
}

/// Format an f64 without unnecessary trailing zeros.
fn format_f64(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Escape text content; line breaks become `<br>`.
fn escape_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => result.push_str("<br>"),
            _ => push_escaped(&mut result, ch),
        }
    }
    result
}

/// Escape text for use in element content or a double-quoted attribute.
pub(crate) fn escape_html(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut result, ch);
    }
    result
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#39;"),
        _ => out.push(ch),
    }
}
