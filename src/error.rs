//! Error types for loading, linking and filtering templates

use std::path::{Path, PathBuf};

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::parser::ast::Position;
use crate::parser::SourceFile;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Parse error at {span:?}: {message}")]
    Syntax {
        span: Span,
        message: String,
        expected: Vec<String>,
    },
}

impl ParseError {
    pub fn span(&self) -> &Span {
        match self {
            ParseError::Syntax { span, .. } => span,
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => {
                let expected_str = if expected.is_empty() {
                    String::new()
                } else {
                    format!("\nExpected: {}", expected.join(", "))
                };
                render_report(
                    source,
                    filename,
                    span.clone(),
                    message,
                    &format!("{}{}", message, expected_str),
                )
                .unwrap_or_else(|| self.to_string())
            }
        }
    }
}

impl<'a> From<chumsky::error::Rich<'a, crate::parser::lexer::Token>> for ParseError {
    fn from(err: chumsky::error::Rich<'a, crate::parser::lexer::Token>) -> Self {
        use chumsky::error::RichReason;

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of input".to_string(),
                };
                format!("Unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                chumsky::error::RichPattern::Token(tok) => Some(format_token(tok)),
                chumsky::error::RichPattern::Label(label) => Some(label.to_string()),
                chumsky::error::RichPattern::EndOfInput => Some("end of input".to_string()),
                _ => None,
            })
            .collect();

        ParseError::Syntax {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &crate::parser::lexer::Token) -> String {
    use crate::parser::lexer::Token;
    match tok {
        Token::Ident(s) => format!("identifier '{}'", s),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Number(n) => format!("number {}", n),
        Token::BraceOpen => "'{'".to_string(),
        Token::BraceClose => "'}'".to_string(),
        Token::BracketOpen => "'['".to_string(),
        Token::BracketClose => "']'".to_string(),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Extends => "keyword 'extends'".to_string(),
        Token::Include => "keyword 'include'".to_string(),
        Token::Block => "keyword 'block'".to_string(),
        Token::Append => "keyword 'append'".to_string(),
        Token::Prepend => "keyword 'prepend'".to_string(),
        Token::Replace => "keyword 'replace'".to_string(),
        Token::Mixin => "keyword 'mixin'".to_string(),
        Token::Yield => "keyword 'yield'".to_string(),
        _ => format!("{:?}", tok),
    }
}

/// Codes of structural and semantic template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ExtendsNotFirst,
    UnexpectedNodesInExtendingRoot,
    UnexpectedBlock,
    FilterAliasChain,
    FilterOptionNotConstant,
    UnknownFilter,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ExtendsNotFirst => "EXTENDS_NOT_FIRST",
            ErrorCode::UnexpectedNodesInExtendingRoot => "UNEXPECTED_NODES_IN_EXTENDING_ROOT",
            ErrorCode::UnexpectedBlock => "UNEXPECTED_BLOCK",
            ErrorCode::FilterAliasChain => "FILTER_ALIAS_CHAIN",
            ErrorCode::FilterOptionNotConstant => "FILTER_OPTION_NOT_CONSTANT",
            ErrorCode::UnknownFilter => "UNKNOWN_FILTER",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid or missing entries in the capability set or configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("the \"{0}\" capability is required")]
    MissingCapability(&'static str),
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors that abort a template compile
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The resolver could not turn a reference into a path
    #[error("{message}{}", format_trace(.trace))]
    Resolution {
        path: String,
        message: String,
        trace: Vec<Position>,
    },

    #[error("failed to read {}: {source}{}", path.display(), format_trace(.trace))]
    Read {
        path: PathBuf,
        source: std::io::Error,
        trace: Vec<Position>,
    },

    #[error("syntax error in {}: {}{}", display_file(.filename.as_deref()), format_parse_errors(.errors), format_trace(.trace))]
    Syntax {
        filename: Option<PathBuf>,
        text: String,
        errors: Vec<ParseError>,
        trace: Vec<Position>,
    },

    /// Violation of the template inheritance rules
    #[error("{code}: {message}\n    at {position}")]
    Structural {
        code: ErrorCode,
        message: String,
        position: Position,
    },

    #[error("filter \"{name}\" failed: {message}\n    at {position}")]
    FilterFailed {
        name: String,
        message: String,
        position: Position,
    },

    #[error("the top level element should always be a block, found {found}")]
    NotABlock { found: &'static str },

    #[error("{kind} of \"{path}\" was linked before it was loaded\n    at {position}")]
    Unloaded {
        kind: &'static str,
        path: String,
        position: Position,
    },
}

impl TemplateError {
    /// Create a structural error for an offending node
    pub fn structural(code: ErrorCode, message: impl Into<String>, position: &Position) -> Self {
        Self::Structural {
            code,
            message: message.into(),
            position: position.clone(),
        }
    }

    pub fn resolution(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            path: path.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
            trace: Vec::new(),
        }
    }

    pub fn syntax(errors: Vec<ParseError>, file: &SourceFile) -> Self {
        Self::Syntax {
            filename: file.filename.clone(),
            text: file.text.clone(),
            errors,
            trace: Vec::new(),
        }
    }

    /// Record the location of the node that referenced the failing file
    pub fn at(mut self, site: &Position) -> Self {
        match &mut self {
            Self::Resolution { trace, .. } | Self::Read { trace, .. } | Self::Syntax { trace, .. } => {
                trace.push(site.clone());
            }
            _ => {}
        }
        self
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Structural { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Location of the offending node, if the error has one
    pub fn position(&self) -> Option<&Position> {
        match self {
            Self::Structural { position, .. }
            | Self::FilterFailed { position, .. }
            | Self::Unloaded { position, .. } => Some(position),
            Self::Resolution { trace, .. } | Self::Read { trace, .. } => trace.first(),
            _ => None,
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        match self {
            Self::Syntax { filename, .. } => filename.as_deref(),
            _ => self.position().and_then(|p| p.filename.as_deref()),
        }
    }

    pub fn line(&self) -> Option<usize> {
        self.position().map(|p| p.line)
    }

    /// Format the error with source context using ariadne.
    ///
    /// `source` must be the text of the file named by [`TemplateError::filename`];
    /// syntax errors carry their own text.
    pub fn report(&self, source: &str) -> String {
        if let Self::Syntax {
            filename,
            text,
            errors,
            ..
        } = self
        {
            let name = display_file(filename.as_deref());
            return errors
                .iter()
                .map(|e| e.format(text, &name))
                .collect::<Vec<_>>()
                .join("\n");
        }
        let Some(position) = self.position() else {
            return self.to_string();
        };
        let name = display_file(position.filename.as_deref());
        let headline = match self {
            Self::Structural { code, message, .. } => format!("{}: {}", code, message),
            other => other.to_string(),
        };
        render_report(source, &name, line_span(source, position.line), &headline, &headline)
            .unwrap_or_else(|| self.to_string())
    }
}

fn render_report(source: &str, filename: &str, span: Span, message: &str, label: &str) -> Option<String> {
    let mut buf = Vec::new();
    Report::build(ReportKind::Error, filename, span.start)
        .with_message(message)
        .with_label(
            Label::new((filename, span))
                .with_message(label)
                .with_color(Color::Red),
        )
        .finish()
        .write((filename, Source::from(source)), &mut buf)
        .ok()?;
    String::from_utf8(buf).ok()
}

/// Byte range of a 1-based line, without its newline
fn line_span(source: &str, line: usize) -> Span {
    let mut start = 0;
    for (index, content) in source.split_inclusive('\n').enumerate() {
        if index + 1 == line {
            let trimmed = content.trim_end_matches(['\n', '\r']);
            return start..start + trimmed.len();
        }
        start += content.len();
    }
    0..0
}

fn display_file(filename: Option<&Path>) -> String {
    filename
        .map(|f| f.display().to_string())
        .unwrap_or_else(|| "<anonymous>".to_string())
}

fn format_trace(trace: &[Position]) -> String {
    trace
        .iter()
        .map(|site| format!("\n    at {}", site))
        .collect()
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file: &str, line: usize) -> Position {
        Position::new(Some(PathBuf::from(file)), line)
    }

    #[test]
    fn test_structural_error_exposes_code_and_location() {
        let err = TemplateError::structural(
            ErrorCode::UnexpectedBlock,
            "Unexpected block sidebar",
            &pos("views/page.tmpl", 4),
        );
        assert_eq!(err.code(), Some(ErrorCode::UnexpectedBlock));
        assert_eq!(err.filename(), Some(Path::new("views/page.tmpl")));
        assert_eq!(err.line(), Some(4));
        assert_eq!(
            err.to_string(),
            "UNEXPECTED_BLOCK: Unexpected block sidebar\n    at views/page.tmpl line 4"
        );
    }

    #[test]
    fn test_read_error_appends_including_sites() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = TemplateError::read("/views/part.tmpl", io)
            .at(&pos("/views/page.tmpl", 3))
            .at(&pos("/views/index.tmpl", 1));
        let message = err.to_string();
        assert!(message.starts_with("failed to read /views/part.tmpl: missing"));
        assert!(message.contains("\n    at /views/page.tmpl line 3\n    at /views/index.tmpl line 1"));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_at_leaves_structural_errors_untouched() {
        let err = TemplateError::structural(ErrorCode::ExtendsNotFirst, "late", &pos("a.tmpl", 2))
            .at(&pos("b.tmpl", 9));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_line_span() {
        let source = "first\nsecond\r\nthird";
        assert_eq!(line_span(source, 2), 6..12);
        assert_eq!(line_span(source, 3), 14..19);
        assert_eq!(line_span(source, 7), 0..0);
    }

    #[test]
    fn test_report_mentions_code() {
        let source = "extends \"a.tmpl\"\n\"text\"\n";
        let err = TemplateError::structural(
            ErrorCode::UnexpectedNodesInExtendingRoot,
            "Only named blocks and mixins can appear at the top level of an extending template",
            &pos("page.tmpl", 2),
        );
        let report = err.report(source);
        assert!(report.contains("UNEXPECTED_NODES_IN_EXTENDING_ROOT"));
    }
}
