use super::elements::{Block, Table};

/// Top-level document model produced by parsers and consumed by the renderers.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub metadata: Metadata,
    pub pages: Vec<Page>,
}

impl Document {
    /// A single flow page holding `content`.
    pub fn flow(content: Vec<Block>) -> Self {
        Self {
            metadata: Metadata::default(),
            pages: vec![Page::Flow(FlowPage { content })],
        }
    }

    /// All flow blocks, in page order.
    pub fn flow_blocks(&self) -> impl Iterator<Item = &Block> {
        self.pages.iter().flat_map(|page| match page {
            Page::Flow(flow) => flow.content.as_slice(),
            Page::Table(_) => &[][..],
        })
    }
}

/// Document metadata.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// A page in the document; the variant depends on the source format.
#[derive(Debug, Clone)]
pub enum Page {
    /// DOCX and edited HTML: flowing content.
    Flow(FlowPage),
    /// XLSX: one sheet.
    Table(TablePage),
}

/// A flowing-content page.
#[derive(Debug, Clone, Default)]
pub struct FlowPage {
    pub content: Vec<Block>,
}

/// A worksheet rendered as a single table.
#[derive(Debug, Clone)]
pub struct TablePage {
    pub name: String,
    pub table: Table,
}
