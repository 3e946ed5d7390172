use super::style::{Color, ParagraphStyle, TextStyle};

/// Block-level content elements.
#[derive(Debug, Clone)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
    Image(ImageData),
    List(List),
}

/// A paragraph consisting of styled text runs.
#[derive(Debug, Clone)]
pub struct Paragraph {
    pub style: ParagraphStyle,
    pub runs: Vec<Run>,
}

impl Paragraph {
    /// A paragraph with one unstyled run.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            style: ParagraphStyle::default(),
            runs: vec![Run::plain(text)],
        }
    }

    /// True when no run carries visible text.
    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.text.is_empty())
    }

    /// Concatenated run text.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// A run of text with uniform formatting.
#[derive(Debug, Clone, Default)]
pub struct Run {
    pub text: String,
    pub style: TextStyle,
    /// Hyperlink target, if this run is inside a link.
    pub href: Option<String>,
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A table.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub rows: Vec<TableRow>,
}

impl Table {
    /// Number of grid columns, counting spans.
    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.cells.iter().map(|c| c.col_span.max(1) as usize).sum::<usize>())
            .max()
            .unwrap_or(0)
    }
}

/// A table row.
#[derive(Debug, Clone, Default)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

/// A table cell.
#[derive(Debug, Clone)]
pub struct TableCell {
    pub content: Vec<Block>,
    pub col_span: u32,
    pub row_span: u32,
    pub background: Option<Color>,
}

impl Default for TableCell {
    fn default() -> Self {
        Self {
            content: Vec::new(),
            col_span: 1,
            row_span: 1,
            background: None,
        }
    }
}

/// Image data.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub data: Vec<u8>,
    pub format: ImageFormat,
    /// Width in points.
    pub width: Option<f64>,
    /// Height in points.
    pub height: Option<f64>,
}

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// Return the MIME type for this image format.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
        }
    }

    /// Inverse of [`ImageFormat::mime`].
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/bmp" => Some(Self::Bmp),
            _ => None,
        }
    }
}

/// Ordered or unordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Ordered,
    Unordered,
}

/// A list; nesting is carried by each item's level.
#[derive(Debug, Clone)]
pub struct List {
    pub kind: ListKind,
    pub items: Vec<ListItem>,
}

/// A list item at a nesting level (0 = top).
#[derive(Debug, Clone)]
pub struct ListItem {
    pub content: Vec<Paragraph>,
    pub level: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_cell_default() {
        let cell = TableCell::default();
        assert_eq!(cell.col_span, 1);
        assert_eq!(cell.row_span, 1);
        assert!(cell.content.is_empty());
        assert!(cell.background.is_none());
    }

    #[test]
    fn test_paragraph_with_runs() {
        let para = Paragraph {
            style: ParagraphStyle::default(),
            runs: vec![
                Run::plain("Hello "),
                Run {
                    text: "world".to_string(),
                    style: TextStyle {
                        bold: Some(true),
                        ..TextStyle::default()
                    },
                    href: None,
                },
            ],
        };
        assert_eq!(para.runs.len(), 2);
        assert_eq!(para.text(), "Hello world");
        assert_eq!(para.runs[1].style.bold, Some(true));
        assert!(!para.is_empty());
    }

    #[test]
    fn test_paragraph_is_empty_with_blank_runs() {
        let para = Paragraph {
            style: ParagraphStyle::default(),
            runs: vec![Run::plain("")],
        };
        assert!(para.is_empty());
    }

    #[test]
    fn test_table_column_count_counts_spans() {
        let table = Table {
            rows: vec![
                TableRow {
                    cells: vec![TableCell {
                        col_span: 3,
                        ..TableCell::default()
                    }],
                },
                TableRow {
                    cells: vec![TableCell::default(), TableCell::default()],
                },
            ],
        };
        assert_eq!(table.column_count(), 3);
        assert_eq!(Table::default().column_count(), 0);
    }

    #[test]
    fn test_image_format_mime_roundtrip() {
        for fmt in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif, ImageFormat::Bmp] {
            assert_eq!(ImageFormat::from_mime(fmt.mime()), Some(fmt));
        }
        assert_eq!(ImageFormat::from_mime("image/svg+xml"), None);
    }
}
