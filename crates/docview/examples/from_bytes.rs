//! Round-trip a DOCX held in memory: bytes → editable HTML → `edited.docx`.
//!
//! Usage:
//!   cargo run --example from_bytes -- input.docx

use std::env;
use std::fs;
use std::process;

use docview::config::{Format, ViewOptions};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <input.docx>", args[0]);
        process::exit(1);
    }

    let data = fs::read(&args[1]).expect("failed to read input file");
    let options = ViewOptions::default();

    let output = match docview::convert_bytes(&data, Format::Docx, &options) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    // Stand-in for a user edit.
    let edited = format!("{}<p>Reviewed.</p>", output.html);

    match docview::export_html(&edited, &options) {
        Ok(file) => {
            fs::write(&file.file_name, &file.bytes).expect("failed to write export");
            println!(
                "Converted {} bytes → {} bytes of HTML → {} ({} bytes)",
                data.len(),
                output.html.len(),
                file.file_name,
                file.bytes.len()
            );
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
