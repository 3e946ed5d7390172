pub mod config;
pub mod error;
pub mod export;
pub mod handle;
pub mod ir;
pub mod parser;
pub mod render;
pub mod state;

#[cfg(not(target_arch = "wasm32"))]
pub mod pipeline;
#[cfg(not(target_arch = "wasm32"))]
pub mod session;
#[cfg(not(target_arch = "wasm32"))]
pub mod source;

#[cfg(feature = "wasm")]
pub mod wasm;

use std::path::Path;

use config::{Format, ViewOptions};
use error::{HtmlOutput, ViewError};
use export::ExportedFile;
use parser::Parser;

/// Convert a DOCX or XLSX file at the given path to HTML.
pub fn convert(path: impl AsRef<Path>) -> Result<HtmlOutput, ViewError> {
    convert_with_options(path, &ViewOptions::default())
}

/// Convert a DOCX or XLSX file at the given path to HTML with options.
///
/// Pass-through kinds (PDF and images) have no HTML form and are rejected
/// like any other unsupported input.
pub fn convert_with_options(
    path: impl AsRef<Path>,
    options: &ViewOptions,
) -> Result<HtmlOutput, ViewError> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let format = config::extension_of(&name)
        .and_then(|ext| Format::from_extension(&ext))
        .ok_or_else(|| ViewError::Classification(name.clone()))?;

    let data = std::fs::read(path).map_err(|source| ViewError::Read { name, source })?;
    convert_bytes(&data, format, options)
}

/// Convert raw bytes of a known format to HTML.
pub fn convert_bytes(
    data: &[u8],
    format: Format,
    options: &ViewOptions,
) -> Result<HtmlOutput, ViewError> {
    let parser: Box<dyn Parser> = match format {
        Format::Docx => Box::new(parser::docx::DocxParser),
        Format::Xlsx => Box::new(parser::xlsx::XlsxParser),
    };

    let (doc, warnings) = parser.parse(data, options)?;
    for warning in &warnings {
        tracing::warn!(%warning, "conversion warning");
    }
    Ok(HtmlOutput {
        html: render_document(&doc),
        title: doc.metadata.title,
        warnings,
    })
}

/// Render an IR Document to an HTML fragment.
pub fn render_document(doc: &ir::Document) -> String {
    render::html_gen::generate_html(doc)
}

/// Export an edited HTML fragment as a `.docx` file.
pub fn export_html(html: &str, options: &ViewOptions) -> Result<ExportedFile, ViewError> {
    export::export_docx(html, None, options)
}

/// Re-render untrusted HTML through the document model.
///
/// Only structure the model can express survives: scripts, event handlers,
/// unsafe link targets and remote images are gone from the output.
pub fn sanitize_html(html: &str) -> String {
    let (doc, _) = parser::html::parse_fragment(html, &ViewOptions::default());
    render_document(&doc)
}
