//! Shared test utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docview::error::ViewError;
use docview::source::Fetcher;
use tokio::sync::oneshot;

/// Build a `.docx` with one plain paragraph per entry.
pub fn make_docx(paragraphs: &[&str]) -> Vec<u8> {
    let doc = paragraphs.iter().fold(docx_rs::Docx::new(), |doc, text| {
        doc.add_paragraph(docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(*text)))
    });
    pack_docx(doc)
}

pub fn pack_docx(doc: docx_rs::Docx) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    doc.build().pack(&mut buf).unwrap();
    buf.into_inner()
}

/// Build a single-sheet `.xlsx` from row-major string values. Empty strings
/// leave the cell unset.
pub fn make_xlsx(rows: &[&[&str]]) -> Vec<u8> {
    let mut book = umya_spreadsheet::new_file();
    let sheet = book.get_sheet_mut(&0).unwrap();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if !value.is_empty() {
                sheet
                    .get_cell_mut(((c + 1) as u32, (r + 1) as u32))
                    .set_value(*value);
            }
        }
    }
    write_xlsx(&book)
}

pub fn write_xlsx(book: &umya_spreadsheet::Spreadsheet) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(book, &mut buf).unwrap();
    buf.into_inner()
}

/// Smallest valid PNG: 1x1 transparent pixel.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Write `bytes` to a unique temp file named `name` and return its path.
pub fn write_temp(name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "docview_test_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Serves canned bytes per URL and counts requests.
#[derive(Default)]
pub struct MapFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl MapFetcher {
    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), bytes);
        self
    }

    /// Request counter that stays readable after the fetcher is moved.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ViewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| ViewError::fetch_failed(url, "HTTP 404 Not Found"))
    }
}

/// Holds one URL's response until the test releases it; other URLs are
/// served immediately.
pub struct GatedFetcher {
    gated_url: String,
    gate: Mutex<Option<oneshot::Receiver<Vec<u8>>>>,
    open: MapFetcher,
}

impl GatedFetcher {
    pub fn new(gated_url: &str, open: MapFetcher) -> (Self, oneshot::Sender<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let fetcher = Self {
            gated_url: gated_url.to_string(),
            gate: Mutex::new(Some(rx)),
            open,
        };
        (fetcher, tx)
    }
}

impl Fetcher for GatedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ViewError> {
        if url == self.gated_url {
            let rx = self.gate.lock().unwrap().take();
            return match rx {
                Some(rx) => rx
                    .await
                    .map_err(|_| ViewError::fetch_failed(url, "gate dropped")),
                None => Err(ViewError::fetch_failed(url, "gate already used")),
            };
        }
        self.open.fetch(url).await
    }
}
