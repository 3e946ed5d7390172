//! Classify → acquire → convert for one document.
//!
//! Conversions run on the blocking pool so a large workbook does not stall
//! the runtime. Pass-through kinds are not converted; their bytes are
//! registered as an object URL instead.

use tracing::{debug, info};

use crate::config::{DocumentKind, ViewOptions, classify, classify_url, mime_type};
use crate::error::{ConvertWarning, Stage, ViewError, panic_message};
use crate::handle::ObjectUrlRegistry;
use crate::source::{AcquiredDocument, DocumentSource, Fetcher, acquire};
use crate::state::ConversionResult;

/// A finished conversion.
#[derive(Debug, Clone)]
pub struct Converted {
    pub result: ConversionResult,
    pub title: Option<String>,
    pub warnings: Vec<ConvertWarning>,
}

/// Kind of `source`, decided before any bytes are read.
///
/// URLs are classified by their final path segment and rejected with
/// `Invalid URL format.` when it carries no extension.
pub fn classify_source(source: &DocumentSource) -> Result<DocumentKind, ViewError> {
    match source {
        DocumentSource::Url(url) => classify_url(url),
        other => Ok(classify(&other.classification_name())),
    }
}

/// Turn acquired bytes into a [`ConversionResult`]. Synchronous; see
/// [`convert_in_background`] for the async entry point.
pub fn convert_acquired(
    doc: AcquiredDocument,
    registry: &ObjectUrlRegistry,
    options: &ViewOptions,
) -> Result<Converted, ViewError> {
    let kind = DocumentKind::from_extension(&doc.extension);
    debug!(name = %doc.name, ?kind, size = doc.bytes.len(), "converting");

    let Some(format) = kind.format() else {
        return match kind {
            DocumentKind::RasterOrPdf => {
                let object_uri = registry.create(doc.bytes, mime_type(&doc.extension), &doc.name);
                Ok(Converted {
                    result: ConversionResult::RasterOrPdf {
                        object_uri,
                        display_name: doc.name,
                    },
                    title: None,
                    warnings: Vec::new(),
                })
            }
            _ => Err(ViewError::Classification(doc.name)),
        };
    };

    let output = crate::convert_bytes(&doc.bytes, format, options)?;
    let result = match kind {
        DocumentKind::Spreadsheet => ConversionResult::Spreadsheet { html: output.html },
        _ => ConversionResult::RichText { html: output.html },
    };
    info!(name = %doc.name, warnings = output.warnings.len(), "document converted");
    Ok(Converted {
        result,
        title: output.title,
        warnings: output.warnings,
    })
}

/// [`convert_acquired`] on tokio's blocking pool.
pub async fn convert_in_background(
    doc: AcquiredDocument,
    registry: &ObjectUrlRegistry,
    options: &ViewOptions,
) -> Result<Converted, ViewError> {
    let stage = match DocumentKind::from_extension(&doc.extension) {
        DocumentKind::Spreadsheet => Stage::Xlsx,
        _ => Stage::Docx,
    };
    let registry = registry.clone();
    let options = options.clone();
    tokio::task::spawn_blocking(move || convert_acquired(doc, &registry, &options))
        .await
        .map_err(|e| {
            let message = if e.is_panic() {
                panic_message(e.into_panic().as_ref())
            } else {
                e.to_string()
            };
            ViewError::parse(stage, message)
        })?
}

/// The whole pipeline for one source.
pub async fn run<F: Fetcher>(
    source: DocumentSource,
    fetcher: &F,
    registry: &ObjectUrlRegistry,
    options: &ViewOptions,
) -> Result<Converted, ViewError> {
    let kind = classify_source(&source)?;
    if kind == DocumentKind::Unsupported {
        return Err(ViewError::Classification(source.classification_name()));
    }
    let doc = acquire(source, fetcher).await?;
    convert_in_background(doc, registry, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, ViewError> {
            Err(ViewError::fetch_failed(url, "offline"))
        }
    }

    fn xlsx_bytes() -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_mut(&0).unwrap();
        sheet.get_cell_mut("A1").set_value("Name");
        sheet.get_cell_mut("B1").set_value("Qty");
        sheet.get_cell_mut("A2").set_value("Apple");
        sheet.get_cell_mut("B2").set_value("3");
        let mut buf = std::io::Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buf).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_classify_source() {
        let url = DocumentSource::Url("https://example.com/x/report.PDF?dl=1".to_string());
        assert_eq!(classify_source(&url).unwrap(), DocumentKind::RasterOrPdf);

        let bad = DocumentSource::Url("https://example.com/data".to_string());
        assert_eq!(
            classify_source(&bad).unwrap_err().to_string(),
            "Invalid URL format."
        );

        let upload = DocumentSource::Upload {
            name: "notes.txt".to_string(),
            bytes: vec![],
        };
        assert_eq!(classify_source(&upload).unwrap(), DocumentKind::Unsupported);
    }

    #[test]
    fn test_pass_through_registers_object_url() {
        let registry = ObjectUrlRegistry::new();
        let converted = convert_acquired(
            AcquiredDocument::new("photo.png", vec![0x89, b'P', b'N', b'G']),
            &registry,
            &ViewOptions::default(),
        )
        .unwrap();
        let ConversionResult::RasterOrPdf {
            object_uri,
            display_name,
        } = converted.result
        else {
            panic!("Expected RasterOrPdf, got {:?}", converted.result);
        };
        assert_eq!(display_name, "photo.png");
        let blob = registry.resolve(&object_uri).unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.bytes, [0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_spreadsheet_converts_to_table() {
        let converted = convert_acquired(
            AcquiredDocument::new("sheet1.xlsx", xlsx_bytes()),
            &ObjectUrlRegistry::new(),
            &ViewOptions::default(),
        )
        .unwrap();
        assert_eq!(
            converted.result,
            ConversionResult::Spreadsheet {
                html: "<table>\n<tr><td>Name</td><td>Qty</td></tr>\n<tr><td>Apple</td><td>3</td></tr>\n</table>\n"
                    .to_string()
            }
        );
    }

    #[test]
    fn test_unsupported_bytes_are_rejected() {
        let err = convert_acquired(
            AcquiredDocument::new("notes.txt", b"hi".to_vec()),
            &ObjectUrlRegistry::new(),
            &ViewOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: notes.txt");
    }

    #[tokio::test]
    async fn test_corrupt_docx_fails_in_background() {
        let err = convert_in_background(
            AcquiredDocument::new("broken.docx", b"not a zip".to_vec()),
            &ObjectUrlRegistry::new(),
            &ViewOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ViewError::Parse {
                stage: Stage::Docx,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_run_unsupported_upload_never_acquires() {
        let err = run(
            DocumentSource::File("no/such/notes.txt".into()),
            &NoNetwork,
            &ObjectUrlRegistry::new(),
            &ViewOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: notes.txt");
    }

    #[tokio::test]
    async fn test_run_propagates_fetch_error() {
        let err = run(
            DocumentSource::Url("https://example.com/a.pdf".to_string()),
            &NoNetwork,
            &ObjectUrlRegistry::new(),
            &ViewOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error fetching or processing the file: offline"
        );
    }
}
