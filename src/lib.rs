//! Template Linker - resolves template inheritance into a single tree
//!
//! Templates may `extend` a parent document, `include` other documents,
//! override named blocks and pipe text through compile-time filters. This
//! library loads every referenced file, renders filters and links the result
//! into one self-contained syntax tree.
//!
//! # Example
//!
//! ```rust,no_run
//! use template_linker::{compile_file, CompileConfig};
//!
//! let config = CompileConfig::new().with_basedir("views");
//! let linked = compile_file("views/page.tmpl", &config).unwrap();
//! println!("{}", template_linker::outline(&linked.root.nodes));
//! ```

pub mod config;
pub mod error;
pub mod filters;
pub mod linker;
pub mod loader;
pub mod parser;
pub mod walk;

use std::path::{Path, PathBuf};

pub use config::CompileConfig;
pub use error::{ConfigError, ErrorCode, ParseError, TemplateError};
pub use filters::{apply_filters, ConstValue, Filter, FilterConfig, FilterError, FilterOptions};
pub use linker::{link, DeclaredBlocks, LinkedDocument};
pub use loader::{load, load_file, load_source, Capabilities, CapabilitiesBuilder};
pub use parser::{collect_text, outline, Node, SourceFile};

/// Load, filter and link an already parsed document
pub fn compile(ast: &Node, caps: &Capabilities, filters: &FilterConfig) -> Result<LinkedDocument, TemplateError> {
    let loaded = load(ast, caps)?;
    link(apply_filters(loaded, filters)?)
}

/// Compile template source with the default syntax
///
/// `filename` is used to resolve relative references.
///
/// # Example
///
/// ```rust
/// use template_linker::{compile_source, collect_text, CompileConfig};
///
/// let linked = compile_source(r#"div { :upper { "hello" } }"#, None, &CompileConfig::new()).unwrap();
/// assert_eq!(collect_text(&linked.root.nodes), "HELLO");
/// ```
pub fn compile_source(
    source: &str,
    filename: Option<PathBuf>,
    config: &CompileConfig,
) -> Result<LinkedDocument, TemplateError> {
    let caps = config.capabilities()?;
    let loaded = load_source(source, filename, &caps)?;
    link(apply_filters(loaded, &config.filters)?)
}

/// Compile a template file with the default syntax
pub fn compile_file(path: impl AsRef<Path>, config: &CompileConfig) -> Result<LinkedDocument, TemplateError> {
    let caps = config.capabilities()?;
    let loaded = load_file(path, &caps)?;
    link(apply_filters(loaded, &config.filters)?)
}
