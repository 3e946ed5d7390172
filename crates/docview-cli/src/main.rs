use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docview::config::{Format, ViewOptions};
use docview::handle::ObjectUrlRegistry;
use docview::session::Viewer;
use docview::source::{DocumentSource, HttpFetcher};
use docview::state::ConversionResult;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "server")]
mod server;

#[derive(Parser)]
#[command(
    name = "docview",
    version,
    about = "View PDF, image, XLSX and DOCX documents as HTML, and export edits back to DOCX"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log pipeline steps to stderr (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load a file or URL and print what the viewer would show
    Render {
        /// Local path or http(s) URL
        input: String,

        /// Write the HTML here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full view snapshot as JSON
        #[arg(long)]
        json: bool,

        /// Drop embedded images instead of inlining them
        #[arg(long = "no-images")]
        no_images: bool,
    },
    /// Export a .docx or edited .html file to DOCX
    Export {
        /// Input file (.docx or .html)
        input: PathBuf,

        /// Output path (default: the export name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// File name offered for the exported document
        #[arg(long = "export-name")]
        export_name: Option<String>,
    },
    /// Serve the viewer over HTTP
    #[cfg(feature = "server")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 3000)]
        port: u16,

        #[arg(long = "export-name")]
        export_name: Option<String>,

        #[arg(long = "no-images")]
        no_images: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn options(export_name: Option<String>, no_images: bool) -> ViewOptions {
    let mut options = ViewOptions::default();
    if let Some(name) = export_name {
        options.export_file_name = name;
    }
    options.embed_images = !no_images;
    options
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render {
            input,
            output,
            json,
            no_images,
        } => render(&input, output.as_deref(), json, options(None, no_images)),
        Command::Export {
            input,
            output,
            export_name,
        } => export(&input, output, options(export_name, false)),
        #[cfg(feature = "server")]
        Command::Serve {
            host,
            port,
            export_name,
            no_images,
        } => server::start_server(&host, port, options(export_name, no_images)),
    }
}

fn source_for(input: &str) -> DocumentSource {
    if input.contains("://") {
        DocumentSource::Url(input.to_string())
    } else {
        DocumentSource::File(PathBuf::from(input))
    }
}

fn render(input: &str, output: Option<&Path>, json: bool, options: ViewOptions) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let fetcher = HttpFetcher::new(&options)?;
    let viewer = Viewer::new(fetcher, ObjectUrlRegistry::new(), options);

    let snapshot = runtime.block_on(viewer.load(source_for(input)));

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    match snapshot.result {
        Some(ConversionResult::Spreadsheet { html }) | Some(ConversionResult::RichText { html }) => {
            match output {
                Some(path) => {
                    std::fs::write(path, &html)
                        .with_context(|| format!("writing output to {path:?}"))?;
                    println!("Rendered: {input} -> {path:?}");
                }
                None => print!("{html}"),
            }
        }
        Some(ConversionResult::RasterOrPdf { display_name, .. }) => {
            println!("{display_name}: shown as-is by an external viewer (no conversion)");
        }
        Some(ConversionResult::Failed { message }) => bail!(message),
        None => bail!("nothing was loaded"),
    }
    Ok(())
}

fn export(input: &Path, output: Option<PathBuf>, options: ViewOptions) -> Result<()> {
    let name = input.display().to_string();
    let html = match docview::config::extension_of(&name).as_deref() {
        Some("html") | Some("htm") => {
            std::fs::read_to_string(input).with_context(|| format!("reading {input:?}"))?
        }
        Some("docx") => {
            let bytes = std::fs::read(input).with_context(|| format!("reading {input:?}"))?;
            docview::convert_bytes(&bytes, Format::Docx, &options)
                .with_context(|| format!("converting {input:?}"))?
                .html
        }
        _ => bail!("expected a .docx or .html file, got {name}"),
    };

    let file = docview::export_html(&html, &options)?;
    for warning in &file.warnings {
        eprintln!("Warning: {warning}");
    }

    let output = output.unwrap_or_else(|| PathBuf::from(&file.file_name));
    std::fs::write(&output, &file.bytes)
        .with_context(|| format!("writing output to {output:?}"))?;
    println!("Exported: {input:?} -> {output:?}");
    Ok(())
}
