use std::io::{Cursor, Read, Seek};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

use crate::ir::Metadata;

/// Read package metadata from raw OOXML bytes (DOCX or XLSX).
///
/// Returns `Metadata::default()` when the bytes are not a ZIP package.
pub fn extract_metadata(data: &[u8]) -> Metadata {
    match ZipArchive::new(Cursor::new(data)) {
        Ok(mut archive) => extract_metadata_from_zip(&mut archive),
        Err(_) => Metadata::default(),
    }
}

/// Parse Dublin Core metadata from OOXML `docProps/core.xml` inside a ZIP archive.
///
/// Returns `Metadata::default()` if the entry is missing or unparseable (no error).
pub fn extract_metadata_from_zip<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Metadata {
    let xml = match archive.by_name("docProps/core.xml") {
        Ok(mut file) => {
            let mut content = String::new();
            if file.read_to_string(&mut content).is_err() {
                return Metadata::default();
            }
            content
        }
        Err(_) => return Metadata::default(),
    };
    parse_core_xml(&xml)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Title,
    Creator,
}

/// Parse `dc:title` and `dc:creator` from `docProps/core.xml` content.
pub fn parse_core_xml(xml: &str) -> Metadata {
    let mut metadata = Metadata::default();
    let mut reader = Reader::from_str(xml);
    let mut current = Field::None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = match e.local_name().as_ref() {
                    b"title" => Field::Title,
                    b"creator" => Field::Creator,
                    _ => Field::None,
                };
                text.clear();
            }
            Ok(Event::Text(e)) if current != Field::None => {
                if let Ok(content) = e.xml_content() {
                    text.push_str(&content);
                }
            }
            Ok(Event::GeneralRef(e)) if current != Field::None => {
                if let Some(resolved) = e.decode().ok().and_then(|name| resolve_entity(&name)) {
                    text.push(resolved);
                }
            }
            Ok(Event::End(_)) => {
                let value = text.trim();
                if !value.is_empty() {
                    match current {
                        Field::Title => metadata.title = Some(value.to_string()),
                        Field::Creator => metadata.author = Some(value.to_string()),
                        Field::None => {}
                    }
                }
                current = Field::None;
                text.clear();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    metadata
}

/// Resolve a predefined XML entity or a character reference (`#38`, `#x26`).
fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_core_xml_title_and_creator() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:dcterms="http://purl.org/dc/terms/">
  <dc:title>Quarterly Notes</dc:title>
  <dc:creator>Jane Roe</dc:creator>
  <dcterms:created>2024-06-15T10:30:00Z</dcterms:created>
</cp:coreProperties>"#;

        let meta = parse_core_xml(xml);
        assert_eq!(meta.title.as_deref(), Some("Quarterly Notes"));
        assert_eq!(meta.author.as_deref(), Some("Jane Roe"));
    }

    #[test]
    fn test_parse_core_xml_entities() {
        let xml = r#"<cp:coreProperties xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>R&amp;D &#x26; Ops</dc:title></cp:coreProperties>"#;
        let meta = parse_core_xml(xml);
        assert_eq!(meta.title.as_deref(), Some("R&D & Ops"));
    }

    #[test]
    fn test_parse_core_xml_empty_fields() {
        let xml = r#"<cp:coreProperties xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title></dc:title><dc:creator/></cp:coreProperties>"#;
        let meta = parse_core_xml(xml);
        assert!(meta.title.is_none());
        assert!(meta.author.is_none());
    }

    #[test]
    fn test_extract_metadata_from_non_zip() {
        let meta = extract_metadata(b"definitely not a zip");
        assert!(meta.title.is_none());
        assert!(meta.author.is_none());
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("lt"), Some('<'));
        assert_eq!(resolve_entity("#65"), Some('A'));
        assert_eq!(resolve_entity("#x41"), Some('A'));
        assert_eq!(resolve_entity("nbsp"), None);
    }
}
