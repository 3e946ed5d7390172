//! WebAssembly bindings for docview via `wasm-bindgen`.
//!
//! This module is only available when the `wasm` feature is enabled. In the
//! browser the host page owns acquisition (file input, `fetch`) and object
//! URLs; these functions cover classification, conversion, sanitizing and
//! export.
//!
//! # Running WASM integration tests
//!
//! ```bash
//! cd crates/docview
//! wasm-pack test --node --features wasm
//! ```

use wasm_bindgen::prelude::*;

use crate::config::{DocumentKind, Format, ViewOptions, classify, classify_url};
use crate::{convert_bytes, export_html, sanitize_html};

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
}

fn kind_name(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::RasterOrPdf => "RASTER_OR_PDF",
        DocumentKind::Spreadsheet => "SPREADSHEET",
        DocumentKind::RichText => "RICH_TEXT",
        DocumentKind::Unsupported => "UNSUPPORTED",
    }
}

/// Internal: classify a file name or URL (testable on native).
fn classify_inner(name_or_url: &str) -> Result<&'static str, String> {
    let kind = if name_or_url.contains("://") {
        classify_url(name_or_url).map_err(|e| e.to_string())?
    } else {
        classify(name_or_url)
    };
    Ok(kind_name(kind))
}

/// Internal: convert with format string, returning a `String` error (testable on native).
fn convert_to_html_inner(data: &[u8], format: &str) -> Result<String, String> {
    let fmt =
        Format::from_extension(format).ok_or_else(|| format!("Unsupported file type: {format}"))?;
    convert_format_inner(data, fmt)
}

/// Internal: convert with a known `Format`, returning a `String` error (testable on native).
fn convert_format_inner(data: &[u8], format: Format) -> Result<String, String> {
    let output = convert_bytes(data, format, &ViewOptions::default()).map_err(|e| e.to_string())?;
    Ok(output.html)
}

fn export_inner(html: &str) -> Result<Vec<u8>, String> {
    export_html(html, &ViewOptions::default())
        .map(|file| file.bytes)
        .map_err(|e| e.to_string())
}

/// Classify a file name or URL.
///
/// Returns one of `"RASTER_OR_PDF"`, `"SPREADSHEET"`, `"RICH_TEXT"` or
/// `"UNSUPPORTED"`; throws `"Invalid URL format."` for a URL whose final
/// segment has no extension.
#[wasm_bindgen(js_name = "classifyDocument")]
pub fn classify_document(name_or_url: &str) -> Result<String, JsValue> {
    classify_inner(name_or_url)
        .map(String::from)
        .map_err(|e| JsValue::from_str(&e))
}

/// Convert a DOCX or XLSX document to an HTML fragment.
///
/// `format` is `"docx"` or `"xlsx"` (case-insensitive).
#[wasm_bindgen(js_name = "convertToHtml")]
pub fn convert_to_html(data: &[u8], format: &str) -> Result<String, JsValue> {
    convert_to_html_inner(data, format).map_err(|e| JsValue::from_str(&e))
}

#[wasm_bindgen(js_name = "convertDocxToHtml")]
pub fn convert_docx_to_html(data: &[u8]) -> Result<String, JsValue> {
    convert_format_inner(data, Format::Docx).map_err(|e| JsValue::from_str(&e))
}

/// Convert the first sheet of an XLSX workbook to an HTML `<table>`.
#[wasm_bindgen(js_name = "convertXlsxToHtml")]
pub fn convert_xlsx_to_html(data: &[u8]) -> Result<String, JsValue> {
    convert_format_inner(data, Format::Xlsx).map_err(|e| JsValue::from_str(&e))
}

/// Export edited HTML as `.docx` bytes (offer them as `edited.docx`).
#[wasm_bindgen(js_name = "exportHtmlToDocx")]
pub fn export_html_to_docx(html: &str) -> Result<Vec<u8>, JsValue> {
    export_inner(html).map_err(|e| JsValue::from_str(&e))
}

/// Re-render untrusted HTML so it is safe to inject into the page.
#[wasm_bindgen(js_name = "sanitizeHtml")]
pub fn sanitize(html: &str) -> String {
    sanitize_html(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_minimal_docx() -> Vec<u8> {
        let doc = docx_rs::Docx::new().add_paragraph(
            docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text("Hello WASM")),
        );
        let mut buf = Cursor::new(Vec::new());
        doc.build().pack(&mut buf).unwrap();
        buf.into_inner()
    }

    fn make_minimal_xlsx() -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file();
        book.get_sheet_mut(&0)
            .unwrap()
            .get_cell_mut("A1")
            .set_value("Hello");
        let mut buf = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buf).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_classify_inner_names_and_urls() {
        assert_eq!(classify_inner("a.PNG").unwrap(), "RASTER_OR_PDF");
        assert_eq!(classify_inner("book.xlsx").unwrap(), "SPREADSHEET");
        assert_eq!(classify_inner("https://x.org/f/a.docx?v=1").unwrap(), "RICH_TEXT");
        assert_eq!(classify_inner("notes.txt").unwrap(), "UNSUPPORTED");
        assert_eq!(
            classify_inner("https://x.org/data").unwrap_err(),
            "Invalid URL format."
        );
    }

    #[test]
    fn test_convert_to_html_inner_docx() {
        let html = convert_to_html_inner(&make_minimal_docx(), "docx").unwrap();
        assert_eq!(html, "<p>Hello WASM</p>\n");
    }

    #[test]
    fn test_convert_to_html_inner_xlsx() {
        let html = convert_to_html_inner(&make_minimal_xlsx(), "XLSX").unwrap();
        assert!(html.starts_with("<table>"));
        assert!(html.contains("<td>Hello</td>"));
    }

    #[test]
    fn test_convert_to_html_inner_unsupported_format() {
        let err = convert_to_html_inner(b"data", "pdf").unwrap_err();
        assert_eq!(err, "Unsupported file type: pdf");
    }

    #[test]
    fn test_convert_format_inner_invalid_data() {
        let err = convert_format_inner(b"not a zip", Format::Xlsx).unwrap_err();
        assert!(err.starts_with("Error processing xlsx file"), "got: {err}");
    }

    #[test]
    fn test_export_inner_produces_zip() {
        let bytes = export_inner("<p>edited</p>").unwrap();
        assert!(bytes.starts_with(b"PK"));
        let html = convert_format_inner(&bytes, Format::Docx).unwrap();
        assert_eq!(html, "<p>edited</p>\n");
    }
}

#[cfg(all(target_arch = "wasm32", test))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn wasm_classify_document() {
        assert_eq!(classify_document("photo.jpg").unwrap(), "RASTER_OR_PDF");
    }

    #[wasm_bindgen_test]
    fn wasm_sanitize_html_drops_scripts() {
        assert_eq!(sanitize("<p>x</p><script>y</script>"), "<p>x</p>\n");
    }

    #[wasm_bindgen_test]
    fn wasm_export_round_trip() {
        let bytes = export_html_to_docx("<p>round</p>").unwrap();
        assert_eq!(convert_docx_to_html(&bytes).unwrap(), "<p>round</p>\n");
    }
}
