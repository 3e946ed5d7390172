//! Convert a DOCX or XLSX document to an HTML fragment.
//!
//! Usage:
//!   cargo run --example simple_convert -- input.docx output.html

use std::env;
use std::fs;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <input> <output.html>", args[0]);
        eprintln!("  Supported formats: .docx, .xlsx");
        process::exit(1);
    }

    let input = &args[1];
    let output = &args[2];

    match docview::convert(input) {
        Ok(result) => {
            if !result.warnings.is_empty() {
                eprintln!("{} warning(s):", result.warnings.len());
                for w in &result.warnings {
                    eprintln!("  - {w}");
                }
            }
            fs::write(output, &result.html).expect("failed to write HTML");
            println!("Wrote {} bytes to {output}", result.html.len());
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
