use serde::Serialize;

use crate::error::ViewError;

/// Extensions offered by the input surface, in picker order.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpeg", "png", "jpg", "pdf", "docx", "xlsx"];

/// File name given to exported word-processing documents.
pub const DEFAULT_EXPORT_FILE_NAME: &str = "edited.docx";

/// MIME type of exported documents.
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Document family, derived from a name or URL extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    /// Rendered as-is by an external viewer.
    RasterOrPdf,
    /// Converted to an HTML table.
    Spreadsheet,
    /// Converted to editable HTML.
    RichText,
    Unsupported,
}

impl DocumentKind {
    /// Map a bare extension (no dot) to a kind. Case-insensitive.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" | "jpeg" | "jpg" | "png" => Self::RasterOrPdf,
            "xlsx" => Self::Spreadsheet,
            "docx" => Self::RichText,
            _ => Self::Unsupported,
        }
    }

    /// The conversion format for kinds that are converted to HTML.
    pub fn format(self) -> Option<Format> {
        match self {
            Self::Spreadsheet => Some(Format::Xlsx),
            Self::RichText => Some(Format::Docx),
            Self::RasterOrPdf | Self::Unsupported => None,
        }
    }
}

/// Formats with a conversion to HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Docx,
    Xlsx,
}

impl Format {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        DocumentKind::from_extension(ext).format()
    }
}

/// Lower-cased substring after the last `.`, if it looks like an extension.
///
/// A candidate containing `/` (e.g. `example.com/data`) is not an extension.
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Classify a file name or URL by its trailing extension.
pub fn classify(name_or_url: &str) -> DocumentKind {
    extension_of(name_or_url).map_or(DocumentKind::Unsupported, |ext| {
        DocumentKind::from_extension(&ext)
    })
}

/// Classify a URL before any network call.
///
/// The final path segment decides; query and fragment are ignored. A URL
/// without `scheme://host` or without an extension in its final segment is
/// rejected with `Invalid URL format.`.
pub fn classify_url(url: &str) -> Result<DocumentKind, ViewError> {
    let segment = final_path_segment(url).ok_or_else(|| ViewError::invalid_url(url))?;
    let ext = extension_of(segment).ok_or_else(|| ViewError::invalid_url(url))?;
    Ok(DocumentKind::from_extension(&ext))
}

/// The last non-empty path segment of an absolute URL.
pub fn final_path_segment(url: &str) -> Option<&str> {
    let trimmed = url.trim();
    let (scheme, rest) = trimmed.split_once("://")?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (host, path) = rest.split_once('/')?;
    if host.is_empty() {
        return None;
    }
    path.rsplit('/').find(|s| !s.is_empty())
}

/// MIME type used when exposing pass-through bytes through an object URL.
pub fn mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "docx" => DOCX_MIME,
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Options controlling conversion and export.
#[derive(Debug, Clone)]
pub struct ViewOptions {
    /// File name offered for exported documents.
    pub export_file_name: String,
    /// Embed document images as `data:` URIs; when false they are dropped.
    pub embed_images: bool,
    /// User-Agent sent with remote fetches.
    pub user_agent: String,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            export_file_name: DEFAULT_EXPORT_FILE_NAME.to_string(),
            embed_images: true,
            user_agent: concat!("docview/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
