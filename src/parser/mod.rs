//! Default lexer and parser for the template syntax

pub mod ast;
mod grammar;
pub mod lexer;

use std::path::PathBuf;

pub use ast::*;
pub use grammar::{parse, TEMPLATE_EXTENSION};
pub use lexer::{Token, Tokens};

/// Template source text with the file it came from
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub text: String,
    pub filename: Option<PathBuf>,
}

impl SourceFile {
    pub fn new(text: impl Into<String>, filename: Option<PathBuf>) -> Self {
        Self {
            text: text.into(),
            filename,
        }
    }
}

/// Lex and parse a template in one step
pub fn parse_source(file: &SourceFile) -> Result<Node, crate::TemplateError> {
    let tokens = lexer::tokenize(&file.text)
        .map_err(|e| crate::TemplateError::syntax(vec![e], file))?;
    parse(tokens, file).map_err(|errors| crate::TemplateError::syntax(errors, file))
}
