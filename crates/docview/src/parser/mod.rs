pub mod docx;
pub mod html;
pub(crate) mod metadata;
pub mod xlsx;

use crate::config::ViewOptions;
use crate::error::{ConvertWarning, ViewError};
use crate::ir::Document;

/// Trait for parsing an input format into the IR.
pub trait Parser {
    /// Parse raw bytes into a Document IR and any non-fatal warnings.
    fn parse(
        &self,
        data: &[u8],
        options: &ViewOptions,
    ) -> Result<(Document, Vec<ConvertWarning>), ViewError>;
}
