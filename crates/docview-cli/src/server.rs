//! HTTP server mode for docview.
//!
//! One document slot shared by all clients, served via `docview serve`.

use std::io::Read;

use anyhow::{Result, anyhow};
use docview::config::{ACCEPTED_EXTENSIONS, ViewOptions};
use docview::handle::ObjectUrlRegistry;
use docview::session::Viewer;
use docview::source::{DocumentSource, HttpFetcher};
use docview::state::{Phase, ViewSnapshot};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// Everything a request handler needs.
pub struct AppState {
    runtime: Runtime,
    viewer: Viewer<HttpFetcher>,
}

impl AppState {
    pub fn new(options: ViewOptions) -> Result<Self> {
        let runtime = Runtime::new()?;
        let fetcher = HttpFetcher::new(&options)?;
        Ok(Self {
            runtime,
            viewer: Viewer::new(fetcher, ObjectUrlRegistry::new(), options),
        })
    }
}

/// Start the HTTP server on the given host and port.
///
/// Requests are served one at a time, each load running to completion
/// before the next request is read, so loads never overlap here. Overlapping
/// loads only arise when [`Viewer::load`] is driven concurrently by an
/// embedding caller.
pub fn start_server(host: &str, port: u16, options: ViewOptions) -> Result<()> {
    let addr = format!("{host}:{port}");
    let server =
        tiny_http::Server::http(&addr).map_err(|e| anyhow!("failed to bind to {addr}: {e}"))?;
    let state = AppState::new(options)?;

    info!(%addr, "docview server listening");
    eprintln!("docview server listening on http://{addr}");
    eprintln!("Endpoints:");
    eprintln!("  POST /load      - Upload a document (multipart)");
    eprintln!("  POST /load-url  - Load a document from a URL");
    eprintln!("  GET  /view      - Current view as JSON");
    eprintln!("  PUT  /edit      - Replace the editable HTML");
    eprintln!("  POST /export    - Download the edited document as DOCX");
    eprintln!("  GET  /blob/<id> - Bytes behind an object URL");
    eprintln!("  GET  /health    - Health check");
    eprintln!("  GET  /formats   - List accepted extensions");

    for mut request in server.incoming_requests() {
        let response = dispatch(&mut request, &state);
        if let Err(e) = request.respond(response) {
            warn!(error = %e, "failed to send response");
        }
    }

    Ok(())
}

type Response = tiny_http::Response<std::io::Cursor<Vec<u8>>>;

fn with_header(response: Response, name: &str, value: &str) -> Response {
    match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn json_response(status: i32, body: &serde_json::Value) -> Response {
    let response = tiny_http::Response::from_string(body.to_string()).with_status_code(status);
    with_header(response, "Content-Type", "application/json")
}

fn error_response(status: i32, message: impl std::fmt::Display) -> Response {
    json_response(status, &json!({ "error": message.to_string() }))
}

fn snapshot_response(snapshot: &ViewSnapshot) -> Response {
    let status = if snapshot.phase == Phase::Failed { 422 } else { 200 };
    match serde_json::to_value(snapshot) {
        Ok(body) => json_response(status, &body),
        Err(e) => error_response(500, e),
    }
}

fn dispatch(request: &mut tiny_http::Request, state: &AppState) -> Response {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or(&url).to_string();
    let method = request.method().clone();

    match (&method, path.as_str()) {
        (tiny_http::Method::Get, "/health") => handle_health(),
        (tiny_http::Method::Get, "/formats") => handle_formats(),
        (tiny_http::Method::Get, "/view") => snapshot_response(&state.viewer.snapshot()),
        (tiny_http::Method::Post, "/load") => handle_load(request, state),
        (tiny_http::Method::Post, "/load-url") => handle_load_url(request, state),
        (tiny_http::Method::Put, "/edit") => handle_edit(request, state),
        (tiny_http::Method::Post, "/export") => handle_export(state),
        (tiny_http::Method::Get, p) if p.starts_with("/blob/") => {
            handle_blob(&p["/blob/".len()..], state)
        }
        _ => error_response(404, "not found"),
    }
}

fn handle_health() -> Response {
    json_response(
        200,
        &json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }),
    )
}

fn handle_formats() -> Response {
    json_response(200, &json!({ "formats": ACCEPTED_EXTENSIONS }))
}

fn read_body(request: &mut tiny_http::Request) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    request.as_reader().read_to_end(&mut body)?;
    Ok(body)
}

fn handle_load(request: &mut tiny_http::Request, state: &AppState) -> Response {
    match upload_source(request) {
        Ok(source) => snapshot_response(&state.runtime.block_on(state.viewer.load(source))),
        Err(e) => error_response(400, e),
    }
}

fn upload_source(request: &mut tiny_http::Request) -> Result<DocumentSource> {
    let body = read_body(request)?;
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string())
        .unwrap_or_default();

    let boundary = extract_boundary(&content_type)
        .ok_or_else(|| anyhow!("missing or invalid Content-Type boundary"))?;
    let file = extract_file_from_multipart(&body, &boundary)
        .ok_or_else(|| anyhow!("no file found in multipart body"))?;
    Ok(DocumentSource::Upload {
        name: file.filename,
        bytes: file.data,
    })
}

fn handle_load_url(request: &mut tiny_http::Request, state: &AppState) -> Response {
    let url = match read_body(request).map(|body| url_from_body(&body)) {
        Ok(Some(url)) => url,
        Ok(None) => return error_response(400, "request body must contain a URL"),
        Err(e) => return error_response(400, e),
    };
    snapshot_response(
        &state
            .runtime
            .block_on(state.viewer.load(DocumentSource::Url(url))),
    )
}

/// Accepts `{"url": "..."}` or the bare URL as text.
fn url_from_body(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        return value
            .get("url")
            .and_then(|u| u.as_str())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
    }
    (!text.is_empty()).then(|| text.to_string())
}

fn handle_edit(request: &mut tiny_http::Request, state: &AppState) -> Response {
    match read_body(request) {
        Ok(body) => {
            let html = String::from_utf8_lossy(&body).into_owned();
            snapshot_response(&state.viewer.edit(html))
        }
        Err(e) => error_response(400, e),
    }
}

fn handle_export(state: &AppState) -> Response {
    match state.runtime.block_on(state.viewer.export()) {
        Ok(file) => {
            let response = tiny_http::Response::from_data(file.bytes).with_status_code(200);
            let response = with_header(response, "Content-Type", file.content_type);
            with_header(
                response,
                "Content-Disposition",
                &format!("attachment; filename=\"{}\"", file.file_name.replace('"', "")),
            )
        }
        Err(e) => error_response(400, e),
    }
}

fn handle_blob(id: &str, state: &AppState) -> Response {
    let Some(blob) = state.viewer.registry().resolve(id) else {
        return error_response(404, "unknown or revoked object url");
    };
    let response = tiny_http::Response::from_data(blob.bytes.clone()).with_status_code(200);
    let response = with_header(response, "Content-Type", &blob.mime_type);
    with_header(
        response,
        "Content-Disposition",
        &format!("inline; filename=\"{}\"", blob.name.replace('"', "")),
    )
}

// --- Multipart parsing helpers ---

struct MultipartFile {
    filename: String,
    data: Vec<u8>,
}

fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

fn extract_file_from_multipart(body: &[u8], boundary: &str) -> Option<MultipartFile> {
    let delim = format!("--{boundary}");
    let delim_bytes = delim.as_bytes();

    let first_pos = find_bytes(body, delim_bytes)?;
    let after_delim = first_pos + delim_bytes.len();

    let start = if body.get(after_delim..after_delim + 2) == Some(b"\r\n") {
        after_delim + 2
    } else {
        after_delim
    };

    // Part headers end at the first blank line.
    let header_end = find_bytes(&body[start..], b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&body[start..start + header_end]).ok()?;
    let data_start = start + header_end + 4;

    let next_delim_pos = find_bytes(&body[data_start..], delim_bytes)?;
    let data_end = if next_delim_pos >= 2
        && body[data_start + next_delim_pos - 2..data_start + next_delim_pos] == *b"\r\n"
    {
        data_start + next_delim_pos - 2
    } else {
        data_start + next_delim_pos
    };

    let filename = extract_filename_from_headers(headers)?;

    Some(MultipartFile {
        filename,
        data: body[data_start..data_end].to_vec(),
    })
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_filename_from_headers(headers: &str) -> Option<String> {
    let lower = headers.to_ascii_lowercase();
    let idx = lower.find("filename=\"")?;
    let start = idx + "filename=\"".len();
    let rest = &headers[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}
