//! Getting document bytes: local files, uploads and remote URLs.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{ViewOptions, extension_of, final_path_segment};
use crate::error::ViewError;

/// Where a document comes from. Consumed by one acquisition.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// A file on the local filesystem.
    File(PathBuf),
    /// Bytes already read from a local handle (e.g. a multipart upload).
    Upload { name: String, bytes: Vec<u8> },
    /// A remote resource, fetched with a single GET.
    Url(String),
}

impl DocumentSource {
    /// The name shown to the user and used for classification.
    pub fn label(&self) -> String {
        match self {
            Self::File(path) => file_label(path),
            Self::Upload { name, .. } => name.clone(),
            Self::Url(url) => url.clone(),
        }
    }

    /// The string classification looks at: the file name, or the final URL
    /// path segment.
    pub fn classification_name(&self) -> String {
        match self {
            Self::Url(url) => final_path_segment(url).unwrap_or(url).to_string(),
            _ => self.label(),
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Bytes produced by the acquirer.
#[derive(Debug, Clone)]
pub struct AcquiredDocument {
    pub name: String,
    /// Lower-cased extension, empty if none.
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl AcquiredDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let extension = extension_of(&name).unwrap_or_default();
        Self {
            name,
            extension,
            bytes,
        }
    }
}

/// Fetches remote bytes. Implemented over HTTP by [`HttpFetcher`]; tests
/// substitute an in-memory implementation.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ViewError>> + Send;
}

/// `reqwest`-backed fetcher: one plain GET straight to the host, no retry,
/// no timeout. Proxy settings in the environment are ignored.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(options: &ViewOptions) -> Result<Self, ViewError> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .no_proxy()
            .build()
            .map_err(|e| ViewError::fetch_failed("", e))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ViewError> {
        info!(url, "fetching remote document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ViewError::fetch_failed(url, e))?;

        if !response.status().is_success() {
            return Err(ViewError::fetch_failed(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ViewError::fetch_failed(url, e))?;
        debug!(url, size = bytes.len(), "remote document received");
        Ok(bytes.to_vec())
    }
}

/// Read a local source fully.
pub async fn acquire_local(source: DocumentSource) -> Result<AcquiredDocument, ViewError> {
    match source {
        DocumentSource::File(path) => {
            let name = file_label(&path);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| ViewError::Read {
                    name: name.clone(),
                    source,
                })?;
            debug!(%name, size = bytes.len(), "local file read");
            Ok(AcquiredDocument::new(name, bytes))
        }
        DocumentSource::Upload { name, bytes } => Ok(AcquiredDocument::new(name, bytes)),
        DocumentSource::Url(url) => Err(ViewError::fetch_failed(
            url,
            "remote source passed to local acquisition",
        )),
    }
}

/// Fetch a remote source. A URL without a usable final segment is rejected
/// before any request is made.
pub async fn acquire_remote<F: Fetcher>(
    url: &str,
    fetcher: &F,
) -> Result<AcquiredDocument, ViewError> {
    let segment = final_path_segment(url).ok_or_else(|| ViewError::invalid_url(url))?;
    if extension_of(segment).is_none() {
        return Err(ViewError::invalid_url(url));
    }
    let bytes = fetcher.fetch(url.trim()).await?;
    Ok(AcquiredDocument::new(segment, bytes))
}

/// Acquire any source.
pub async fn acquire<F: Fetcher>(
    source: DocumentSource,
    fetcher: &F,
) -> Result<AcquiredDocument, ViewError> {
    match source {
        DocumentSource::Url(url) => acquire_remote(&url, fetcher).await,
        local => acquire_local(local).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed bytes and counts calls.
    struct StaticFetcher {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ViewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    fn fetcher() -> StaticFetcher {
        StaticFetcher {
            bytes: b"%PDF-1.7".to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_acquired_document_extension() {
        assert_eq!(AcquiredDocument::new("A.PDF", vec![]).extension, "pdf");
        assert_eq!(AcquiredDocument::new("README", vec![]).extension, "");
    }

    #[test]
    fn test_source_labels() {
        let file = DocumentSource::File(PathBuf::from("/tmp/notes.docx"));
        assert_eq!(file.label(), "notes.docx");
        let url = DocumentSource::Url("https://example.com/a/report.pdf?x=1".to_string());
        assert_eq!(url.label(), "https://example.com/a/report.pdf?x=1");
        assert_eq!(url.classification_name(), "report.pdf");
    }

    #[tokio::test]
    async fn test_acquire_upload_passes_bytes_through() {
        let doc = acquire_local(DocumentSource::Upload {
            name: "photo.png".to_string(),
            bytes: vec![1, 2],
        })
        .await
        .unwrap();
        assert_eq!(doc.name, "photo.png");
        assert_eq!(doc.extension, "png");
        assert_eq!(doc.bytes, [1, 2]);
    }

    #[tokio::test]
    async fn test_acquire_missing_file_is_read_error() {
        let err = acquire_local(DocumentSource::File(PathBuf::from(
            "definitely/not/here.docx",
        )))
        .await
        .unwrap_err();
        assert!(matches!(err, ViewError::Read { .. }));
        assert!(err.to_string().starts_with("Error reading here.docx"));
    }

    #[tokio::test]
    async fn test_acquire_remote_uses_final_segment_as_name() {
        let f = fetcher();
        let doc = acquire_remote("https://example.com/files/report.pdf?v=2", &f)
            .await
            .unwrap();
        assert_eq!(doc.name, "report.pdf");
        assert_eq!(doc.extension, "pdf");
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_remote_invalid_url_makes_no_call() {
        let f = fetcher();
        for url in ["https://example.com/data", "not a url", "https://example.com/"] {
            let err = acquire_remote(url, &f).await.unwrap_err();
            assert_eq!(err.to_string(), "Invalid URL format.");
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }
}
