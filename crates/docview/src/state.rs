//! Presentation state as a pure state machine.
//!
//! Every event carries the generation of the load it belongs to. A
//! `LoadRequested` with a newer generation discards the previous state; any
//! other event whose generation is not the current one is ignored, so a slow
//! conversion can never overwrite a newer document.

use serde::Serialize;

use crate::config::DocumentKind;
use crate::error::{ErrorKind, ViewError};
use crate::export::EditableDocument;

/// The artifact produced by one load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionResult {
    RasterOrPdf {
        object_uri: String,
        display_name: String,
    },
    Spreadsheet {
        html: String,
    },
    RichText {
        html: String,
    },
    Failed {
        message: String,
    },
}

/// A `{locator, display name}` pair for an external document viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerDocument {
    pub uri: String,
    pub file_name: String,
}

impl ConversionResult {
    pub fn failed(error: &ViewError) -> Self {
        Self::Failed {
            message: error.to_string(),
        }
    }

    /// The object URL owned by this result, if any.
    pub fn object_uri(&self) -> Option<&str> {
        match self {
            Self::RasterOrPdf { object_uri, .. } => Some(object_uri),
            _ => None,
        }
    }

    /// HTML to show inline, for the converted kinds.
    pub fn html(&self) -> Option<&str> {
        match self {
            Self::Spreadsheet { html } | Self::RichText { html } => Some(html),
            _ => None,
        }
    }

    /// Documents to hand to an external viewer (pass-through results only).
    pub fn viewer_documents(&self) -> Vec<ViewerDocument> {
        match self {
            Self::RasterOrPdf {
                object_uri,
                display_name,
            } => vec![ViewerDocument {
                uri: object_uri.clone(),
                file_name: display_name.clone(),
            }],
            _ => Vec::new(),
        }
    }
}

/// User-facing error line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ViewError> for ErrorBanner {
    fn from(error: &ViewError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of the last successful export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub file_name: String,
    pub size: usize,
}

/// Where the current load stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Acquiring,
    Converting,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub enum Event {
    LoadRequested {
        generation: u64,
        source_label: String,
        kind: DocumentKind,
    },
    AcquisitionSucceeded {
        generation: u64,
    },
    AcquisitionFailed {
        generation: u64,
        error: ErrorBanner,
    },
    ConversionSucceeded {
        generation: u64,
        result: ConversionResult,
        title: Option<String>,
    },
    ConversionFailed {
        generation: u64,
        error: ErrorBanner,
    },
    EditChanged {
        generation: u64,
        html: String,
    },
    ExportRequested {
        generation: u64,
    },
    ExportSucceeded {
        generation: u64,
        summary: ExportSummary,
    },
    ExportFailed {
        generation: u64,
        error: ErrorBanner,
    },
}

impl Event {
    pub fn generation(&self) -> u64 {
        match self {
            Self::LoadRequested { generation, .. }
            | Self::AcquisitionSucceeded { generation }
            | Self::AcquisitionFailed { generation, .. }
            | Self::ConversionSucceeded { generation, .. }
            | Self::ConversionFailed { generation, .. }
            | Self::EditChanged { generation, .. }
            | Self::ExportRequested { generation }
            | Self::ExportSucceeded { generation, .. }
            | Self::ExportFailed { generation, .. } => *generation,
        }
    }
}

/// Everything the presentation layer shows for one document slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub generation: u64,
    pub phase: Phase,
    pub source_label: Option<String>,
    pub kind: Option<DocumentKind>,
    pub result: Option<ConversionResult>,
    pub editable: Option<EditableDocument>,
    pub error: Option<ErrorBanner>,
    pub exporting: bool,
    pub last_export: Option<ExportSummary>,
}

impl ViewState {
    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Acquiring | Phase::Converting)
    }

    /// Whether `event` belongs to a superseded load.
    pub fn is_stale(&self, event: &Event) -> bool {
        match event {
            Event::LoadRequested { generation, .. } => *generation <= self.generation,
            other => other.generation() != self.generation,
        }
    }

    /// Serializable view; the editable HTML is sanitized on the way out.
    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            generation: self.generation,
            loading: self.is_loading(),
            phase: self.phase,
            source_label: self.source_label.clone(),
            kind: self.kind,
            result: self.result.clone(),
            editable_html: self
                .editable
                .as_ref()
                .map(|doc| crate::sanitize_html(doc.html())),
            error: self.error.clone(),
            exporting: self.exporting,
            last_export: self.last_export.clone(),
        }
    }
}

/// JSON view of a [`ViewState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub generation: u64,
    pub loading: bool,
    pub phase: Phase,
    pub source_label: Option<String>,
    pub kind: Option<DocumentKind>,
    pub result: Option<ConversionResult>,
    pub editable_html: Option<String>,
    pub error: Option<ErrorBanner>,
    pub exporting: bool,
    pub last_export: Option<ExportSummary>,
}

/// Apply one event. Stale events return the state unchanged.
pub fn transition(state: ViewState, event: Event) -> ViewState {
    if state.is_stale(&event) {
        return state;
    }

    match event {
        Event::LoadRequested {
            generation,
            source_label,
            kind,
        } => ViewState {
            generation,
            phase: Phase::Acquiring,
            source_label: Some(source_label),
            kind: Some(kind),
            ..ViewState::default()
        },
        Event::AcquisitionSucceeded { .. } if state.phase == Phase::Acquiring => ViewState {
            phase: Phase::Converting,
            ..state
        },
        Event::AcquisitionFailed { error, .. } | Event::ConversionFailed { error, .. }
            if state.is_loading() =>
        {
            ViewState {
                phase: Phase::Failed,
                result: Some(ConversionResult::Failed {
                    message: error.message.clone(),
                }),
                error: Some(error),
                ..state
            }
        }
        Event::ConversionSucceeded { result, title, .. } if state.is_loading() => {
            let editable = match &result {
                ConversionResult::RichText { html } => {
                    Some(EditableDocument::new(html.clone(), title))
                }
                _ => None,
            };
            let failed = matches!(result, ConversionResult::Failed { .. });
            ViewState {
                phase: if failed { Phase::Failed } else { Phase::Ready },
                result: Some(result),
                editable,
                error: None,
                ..state
            }
        }
        Event::EditChanged { html, .. } => {
            let mut next = state;
            if let Some(doc) = next.editable.as_mut() {
                doc.set_html(html);
            }
            next
        }
        Event::ExportRequested { .. } if state.editable.is_some() => ViewState {
            exporting: true,
            ..state
        },
        Event::ExportSucceeded { summary, .. } if state.exporting => ViewState {
            exporting: false,
            last_export: Some(summary),
            error: None,
            ..state
        },
        Event::ExportFailed { error, .. } if state.exporting => ViewState {
            exporting: false,
            error: Some(error),
            ..state
        },
        _ => state,
    }
}
