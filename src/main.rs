//! Template Linker CLI
//!
//! Usage:
//!   template-linker [OPTIONS] [FILE]
//!
//! Options:
//!   -b, --basedir <DIR>   Root for template paths starting with `/`
//!   -c, --config <FILE>   Configuration file (TOML format)
//!   -t, --text            Print the linked text instead of the tree outline
//!   -h, --help            Print help

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use template_linker::{collect_text, compile_file, compile_source, outline, CompileConfig, TemplateError};

#[derive(Parser)]
#[command(name = "template-linker")]
#[command(about = "Resolve template inheritance, includes and filters into one tree")]
struct Cli {
    /// Entry template (reads from stdin if not provided)
    input: Option<PathBuf>,

    /// Root for template paths starting with `/`
    #[arg(short, long)]
    basedir: Option<PathBuf>,

    /// Configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the linked text instead of the tree outline
    #[arg(short, long)]
    text: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "template_linker=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    if cli.input.is_none() && io::stdin().is_terminal() {
        eprintln!("No input. Pass a template file or pipe one on stdin (see --help).");
        std::process::exit(2);
    }

    let mut config = match &cli.config {
        Some(path) => match CompileConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => CompileConfig::default(),
    };
    if let Some(basedir) = cli.basedir {
        config = config.with_basedir(basedir);
    }

    let (result, entry_source) = match &cli.input {
        Some(path) => (compile_file(path, &config), None),
        None => {
            let mut buffer = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut buffer) {
                eprintln!("Error reading from stdin: {}", e);
                std::process::exit(1);
            }
            (compile_source(&buffer, None, &config), Some(buffer))
        }
    };

    match result {
        Ok(linked) => {
            if cli.text {
                print!("{}", collect_text(&linked.root.nodes));
            } else {
                println!("{}", outline(&linked.root.nodes));
            }
        }
        Err(e) => {
            eprintln!("{}", report(&e, cli.input.as_ref(), entry_source.as_deref()));
            std::process::exit(1);
        }
    }
}

/// Render an error against the source of the file it points at
fn report(err: &TemplateError, entry: Option<&PathBuf>, entry_source: Option<&str>) -> String {
    let source = match err.filename().or(entry.map(|p| p.as_path())) {
        Some(path) => std::fs::read_to_string(path).unwrap_or_default(),
        None => entry_source.unwrap_or_default().to_string(),
    };
    format!("Error: {}", err.report(&source))
}
