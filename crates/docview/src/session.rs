//! One document slot: drives the pipeline and feeds its outcomes through
//! [`transition`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::{DocumentKind, ViewOptions};
use crate::error::{ViewError, panic_message};
use crate::export::ExportedFile;
use crate::handle::ObjectUrlRegistry;
use crate::pipeline::{classify_source, convert_in_background};
use crate::source::{DocumentSource, Fetcher, acquire};
use crate::state::{ErrorBanner, Event, ExportSummary, ViewSnapshot, ViewState, transition};

/// A viewer holding at most one document at a time.
///
/// Loads may overlap; only the most recently requested one is ever shown.
/// Object URLs owned by a replaced or superseded result are revoked.
pub struct Viewer<F> {
    fetcher: F,
    registry: ObjectUrlRegistry,
    options: ViewOptions,
    generation: AtomicU64,
    state: Mutex<ViewState>,
}

impl<F: Fetcher> Viewer<F> {
    pub fn new(fetcher: F, registry: ObjectUrlRegistry, options: ViewOptions) -> Self {
        Self {
            fetcher,
            registry,
            options,
            generation: AtomicU64::new(0),
            state: Mutex::new(ViewState::default()),
        }
    }

    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    /// Load `source`, replacing whatever was shown.
    ///
    /// Returns the snapshot after this load settled, which may already show
    /// a newer load.
    pub async fn load(&self, source: DocumentSource) -> ViewSnapshot {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let classified = classify_source(&source);

        self.apply(Event::LoadRequested {
            generation,
            source_label: source.label(),
            kind: *classified.as_ref().unwrap_or(&DocumentKind::Unsupported),
        });

        match classified {
            Err(e) => {
                self.apply(Event::AcquisitionFailed {
                    generation,
                    error: ErrorBanner::from(&e),
                });
                return self.snapshot();
            }
            Ok(DocumentKind::Unsupported) => {
                let e = ViewError::Classification(source.classification_name());
                self.apply(Event::ConversionFailed {
                    generation,
                    error: ErrorBanner::from(&e),
                });
                return self.snapshot();
            }
            Ok(_) => {}
        }

        let doc = match acquire(source, &self.fetcher).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(generation, error = %e, "acquisition failed");
                self.apply(Event::AcquisitionFailed {
                    generation,
                    error: ErrorBanner::from(&e),
                });
                return self.snapshot();
            }
        };
        self.apply(Event::AcquisitionSucceeded { generation });

        match convert_in_background(doc, &self.registry, &self.options).await {
            Ok(converted) => {
                let owned_uri = converted.result.object_uri().map(String::from);
                let applied = self.apply(Event::ConversionSucceeded {
                    generation,
                    result: converted.result,
                    title: converted.title,
                });
                if !applied {
                    if let Some(uri) = owned_uri {
                        self.registry.revoke(&uri);
                    }
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "conversion failed");
                self.apply(Event::ConversionFailed {
                    generation,
                    error: ErrorBanner::from(&e),
                });
            }
        }
        self.snapshot()
    }

    /// Replace the editable HTML of the current document.
    pub fn edit(&self, html: impl Into<String>) -> ViewSnapshot {
        let generation = self.lock().generation;
        self.apply(Event::EditChanged {
            generation,
            html: html.into(),
        });
        self.snapshot()
    }

    /// Export the current editable document. The edit buffer is untouched
    /// whether or not this succeeds.
    pub async fn export(&self) -> Result<ExportedFile, ViewError> {
        let (generation, doc) = {
            let state = self.lock();
            let doc = state
                .editable
                .clone()
                .ok_or_else(|| ViewError::Export("no editable document".to_string()))?;
            (state.generation, doc)
        };

        self.apply(Event::ExportRequested { generation });
        let options = self.options.clone();
        let outcome = tokio::task::spawn_blocking(move || doc.export(&options))
            .await
            .unwrap_or_else(|e| {
                let message = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                Err(ViewError::Export(message))
            });

        match &outcome {
            Ok(file) => {
                self.apply(Event::ExportSucceeded {
                    generation,
                    summary: ExportSummary {
                        file_name: file.file_name.clone(),
                        size: file.bytes.len(),
                    },
                });
            }
            Err(e) => {
                warn!(generation, error = %e, "export failed");
                self.apply(Event::ExportFailed {
                    generation,
                    error: ErrorBanner::from(e),
                });
            }
        }
        outcome
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> ViewState {
        self.lock().clone()
    }
}

impl<F> Viewer<F> {
    /// Apply one event; returns false if it was stale.
    fn apply(&self, event: Event) -> bool {
        let mut state = self.lock();
        if state.is_stale(&event) {
            debug!(
                current = state.generation,
                event = event.generation(),
                "ignoring stale event"
            );
            return false;
        }

        let previous_uri = state
            .result
            .as_ref()
            .and_then(|r| r.object_uri())
            .map(String::from);
        let next = transition(std::mem::take(&mut *state), event);
        let current_uri = next.result.as_ref().and_then(|r| r.object_uri());
        if let Some(uri) = previous_uri {
            if current_uri != Some(uri.as_str()) {
                self.registry.revoke(&uri);
            }
        }
        *state = next;
        true
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F> Drop for Viewer<F> {
    fn drop(&mut self) {
        let state = self.lock();
        if let Some(uri) = state.result.as_ref().and_then(|r| r.object_uri()) {
            self.registry.revoke(uri);
        }
    }
}

