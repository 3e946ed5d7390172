//! Edit buffer for rich-text documents and the HTML → DOCX export.

use tracing::info;

use crate::config::{DOCX_MIME, ViewOptions};
use crate::error::{ConvertWarning, ViewError};
use crate::parser::Parser;
use crate::parser::html::HtmlParser;
use crate::render::docx_gen::generate_docx;
use crate::render::html_gen::wrap_document_shell;

/// Title used for the export shell when the source had none.
const UNTITLED: &str = "Document";

/// The editable HTML of the current rich-text document.
///
/// Edits replace the content verbatim; exporting reads it without consuming it.
#[derive(Debug, Clone, PartialEq)]
pub struct EditableDocument {
    html: String,
    title: Option<String>,
}

impl EditableDocument {
    pub fn new(html: impl Into<String>, title: Option<String>) -> Self {
        Self {
            html: html.into(),
            title,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Last writer wins.
    pub fn set_html(&mut self, html: impl Into<String>) {
        self.html = html.into();
    }

    pub fn export(&self, options: &ViewOptions) -> Result<ExportedFile, ViewError> {
        export_docx(&self.html, self.title(), options)
    }
}

/// A generated file ready to be offered as a download.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub warnings: Vec<ConvertWarning>,
}

/// Wrap `html` in a document shell, read it into the IR and write a `.docx`.
pub fn export_docx(
    html: &str,
    title: Option<&str>,
    options: &ViewOptions,
) -> Result<ExportedFile, ViewError> {
    let shell = wrap_document_shell(html, title.unwrap_or(UNTITLED));
    let (doc, mut warnings) = HtmlParser
        .parse(shell.as_bytes(), options)
        .map_err(|e| ViewError::Export(e.to_string()))?;
    let (bytes, writer_warnings) = generate_docx(&doc)?;
    warnings.extend(writer_warnings);

    info!(
        file = %options.export_file_name,
        size = bytes.len(),
        warnings = warnings.len(),
        "document exported"
    );
    Ok(ExportedFile {
        file_name: options.export_file_name.clone(),
        content_type: DOCX_MIME,
        bytes,
        warnings,
    })
}
