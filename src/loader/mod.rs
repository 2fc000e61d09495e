//! Resolves file references and loads every dependency document

pub mod resolve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ConfigError, TemplateError};
use crate::parser::{self, lexer, Node, SourceFile, Tokens};
use crate::walk::{walk, Visit, Visitor, WalkOptions};

pub use resolve::{default_read, default_resolve};

pub type LexFn = Arc<dyn Fn(&SourceFile) -> Result<Tokens, TemplateError> + Send + Sync>;
pub type ParseFn = Arc<dyn Fn(Tokens, &SourceFile) -> Result<Node, TemplateError> + Send + Sync>;
pub type ResolveFn =
    Arc<dyn Fn(&str, Option<&Path>, &Capabilities) -> Result<PathBuf, TemplateError> + Send + Sync>;
pub type ReadFn = Arc<dyn Fn(&Path) -> std::io::Result<Vec<u8>> + Send + Sync>;

/// Collaborators used to turn file references into documents
#[derive(Clone)]
pub struct Capabilities {
    pub lex: LexFn,
    pub parse: ParseFn,
    pub resolve: ResolveFn,
    pub read: ReadFn,
    /// Root for paths starting with `/`
    pub basedir: Option<PathBuf>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("basedir", &self.basedir)
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    pub fn builder() -> CapabilitiesBuilder {
        CapabilitiesBuilder::default()
    }
}

#[derive(Default)]
pub struct CapabilitiesBuilder {
    lex: Option<LexFn>,
    parse: Option<ParseFn>,
    resolve: Option<ResolveFn>,
    read: Option<ReadFn>,
    basedir: Option<PathBuf>,
}

impl CapabilitiesBuilder {
    /// A builder preset with the built-in lexer and parser
    pub fn with_default_syntax() -> Self {
        Self::default()
            .lex(|file: &SourceFile| {
                lexer::tokenize(&file.text).map_err(|e| TemplateError::syntax(vec![e], file))
            })
            .parse(|tokens, file: &SourceFile| {
                parser::parse(tokens, file).map_err(|errors| TemplateError::syntax(errors, file))
            })
    }

    pub fn lex<F>(mut self, lex: F) -> Self
    where
        F: Fn(&SourceFile) -> Result<Tokens, TemplateError> + Send + Sync + 'static,
    {
        self.lex = Some(Arc::new(lex));
        self
    }

    pub fn parse<F>(mut self, parse: F) -> Self
    where
        F: Fn(Tokens, &SourceFile) -> Result<Node, TemplateError> + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(parse));
        self
    }

    pub fn resolve<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&str, Option<&Path>, &Capabilities) -> Result<PathBuf, TemplateError>
            + Send
            + Sync
            + 'static,
    {
        self.resolve = Some(Arc::new(resolve));
        self
    }

    pub fn read<F>(mut self, read: F) -> Self
    where
        F: Fn(&Path) -> std::io::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.read = Some(Arc::new(read));
        self
    }

    pub fn basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(basedir.into());
        self
    }

    /// Validate the capability set before any loading happens
    pub fn build(self) -> Result<Capabilities, ConfigError> {
        Ok(Capabilities {
            lex: self.lex.ok_or(ConfigError::MissingCapability("lex"))?,
            parse: self.parse.ok_or(ConfigError::MissingCapability("parse"))?,
            resolve: self.resolve.unwrap_or_else(|| Arc::new(default_resolve)),
            read: self.read.unwrap_or_else(|| Arc::new(default_read)),
            basedir: self.basedir,
        })
    }
}

/// Load every dependency reachable from `ast` into a copy of it
pub fn load(ast: &Node, caps: &Capabilities) -> Result<Node, TemplateError> {
    let mut ast = ast.clone();
    load_in_place(&mut ast, caps, &mut Vec::new())?;
    Ok(ast)
}

/// Lex, parse and load an entry document
pub fn load_source(text: &str, filename: Option<PathBuf>, caps: &Capabilities) -> Result<Node, TemplateError> {
    let mut loading: Vec<PathBuf> = filename.iter().cloned().collect();
    parse_and_load(text, filename, caps, &mut loading)
}

/// Read and load an entry document from `path`
pub fn load_file(path: impl AsRef<Path>, caps: &Capabilities) -> Result<Node, TemplateError> {
    let path = path.as_ref();
    let raw = (caps.read)(path).map_err(|e| TemplateError::read(path, e))?;
    load_source(&String::from_utf8_lossy(&raw), Some(path.to_path_buf()), caps)
}

fn parse_and_load(
    text: &str,
    filename: Option<PathBuf>,
    caps: &Capabilities,
    loading: &mut Vec<PathBuf>,
) -> Result<Node, TemplateError> {
    let file = SourceFile::new(text, filename);
    let tokens = (caps.lex)(&file)?;
    let mut ast = (caps.parse)(tokens, &file)?;
    load_in_place(&mut ast, caps, loading)?;
    Ok(ast)
}

fn load_in_place(ast: &mut Node, caps: &Capabilities, loading: &mut Vec<PathBuf>) -> Result<(), TemplateError> {
    walk(ast, &mut Loader { caps, loading }, WalkOptions::with_dependencies())
}

struct Loader<'c> {
    caps: &'c Capabilities,
    /// Documents being parsed, outermost first
    loading: &'c mut Vec<PathBuf>,
}

impl Loader<'_> {
    fn check_cycle(&self, path: &str, full_path: &Path) -> Result<(), TemplateError> {
        let Some(start) = self.loading.iter().position(|p| p == full_path) else {
            return Ok(());
        };
        let chain: Vec<String> = self.loading[start..]
            .iter()
            .chain(std::iter::once(&full_path.to_path_buf()))
            .map(|p| p.display().to_string())
            .collect();
        Err(TemplateError::resolution(
            path,
            format!("circular template reference: {}", chain.join(" -> ")),
        ))
    }
}

impl Visitor for Loader<'_> {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node) -> Result<Visit, TemplateError> {
        let parsed = matches!(node, Node::Extends(_) | Node::Include(_));
        let kind = node.kind();
        let site = node.position().clone();
        let Some(file) = node.file_mut() else {
            return Ok(Visit::Continue);
        };
        if file.is_loaded() {
            return Ok(Visit::Continue);
        }

        let full_path =
            (self.caps.resolve)(&file.path, file.filename.as_deref(), self.caps).map_err(|e| e.at(&site))?;
        if parsed {
            self.check_cycle(&file.path, &full_path).map_err(|e| e.at(&site))?;
        }
        let raw = (self.caps.read)(&full_path).map_err(|e| TemplateError::read(&full_path, e).at(&site))?;
        let text = String::from_utf8_lossy(&raw).into_owned();
        debug!(kind, path = %full_path.display(), bytes = raw.len(), "loaded template dependency");

        if parsed {
            self.loading.push(full_path.clone());
            let loaded = parse_and_load(&text, Some(full_path.clone()), self.caps, self.loading);
            self.loading.pop();
            file.ast = Some(Box::new(loaded.map_err(|e| e.at(&site))?));
        }
        file.full_path = Some(full_path);
        file.raw = Some(raw);
        file.text = Some(text);
        Ok(Visit::Continue)
    }
}
