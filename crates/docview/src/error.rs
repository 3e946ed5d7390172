use serde::Serialize;
use thiserror::Error;

/// Conversion stage a [`ViewError::Parse`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Workbook → HTML table.
    Xlsx,
    /// Word-processing document → HTML.
    Docx,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Xlsx => f.write_str("xlsx"),
            Self::Docx => f.write_str("docx"),
        }
    }
}

/// Errors that can occur while acquiring, converting or exporting a document.
///
/// Every variant renders as a user-facing message; none of them is fatal to
/// the view that produced it.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("Unsupported file type: {0}")]
    Classification(String),

    #[error("Error reading {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Fetch { url: String, message: String },

    #[error("Error processing {stage} file: {message}")]
    Parse { stage: Stage, message: String },

    #[error("Error exporting document: {0}")]
    Export(String),
}

/// Error family, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Classification,
    Read,
    Fetch,
    Parse,
    Export,
}

impl ViewError {
    /// A URL that is malformed or has no extension in its final segment.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: "Invalid URL format.".to_string(),
        }
    }

    /// A network failure for `url`.
    pub fn fetch_failed(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: format!("Error fetching or processing the file: {reason}"),
        }
    }

    pub fn parse(stage: Stage, message: impl Into<String>) -> Self {
        Self::Parse {
            stage,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Classification(_) => ErrorKind::Classification,
            Self::Read { .. } => ErrorKind::Read,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Export(_) => ErrorKind::Export,
        }
    }
}

/// A non-fatal warning emitted when an element cannot be fully processed.
#[derive(Debug, Clone)]
pub struct ConvertWarning {
    /// Description of the element that caused the warning.
    pub element: String,
    /// Reason the element could not be processed.
    pub reason: String,
}

impl std::fmt::Display for ConvertWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.element, self.reason)
    }
}

/// HTML produced by a successful conversion, with any warnings.
#[derive(Debug)]
pub struct HtmlOutput {
    /// The rendered HTML fragment.
    pub html: String,
    /// Document title from the package metadata, if any.
    pub title: Option<String>,
    /// Warnings collected during conversion (non-fatal issues).
    pub warnings: Vec<ConvertWarning>,
}

/// Render a caught panic payload as a message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
