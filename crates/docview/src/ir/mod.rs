//! Intermediate representation shared by the parsers and the renderers.

mod document;
mod elements;
mod style;

pub use document::*;
pub use elements::*;
pub use style::*;
