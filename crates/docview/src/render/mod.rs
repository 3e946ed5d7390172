pub mod docx_gen;
pub mod html_gen;
