//! Lexer for the template syntax using logos

use logos::Logos;

use crate::error::ParseError;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Lexed tokens with their spans
pub type Tokens = Vec<(Token, Span)>;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Document structure keywords
    #[token("extends")]
    Extends,
    #[token("include")]
    Include,
    #[token("block")]
    Block,
    #[token("append")]
    Append,
    #[token("prepend")]
    Prepend,
    #[token("replace")]
    Replace,
    #[token("mixin")]
    Mixin,
    #[token("yield")]
    Yield,

    // Delimiters
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("=")]
    Equals,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_\-]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len()-1])
    })]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len()-1])
    })]
    String(String),

    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    // Comments (skip)
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,
}

/// Resolve backslash escapes inside a quoted literal
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Lex input string, failing on the first unrecognised character
pub fn tokenize(input: &str) -> Result<Tokens, ParseError> {
    let mut tokens = Vec::new();
    for (tok, span) in Token::lexer(input).spanned() {
        match tok {
            Ok(t) => tokens.push((t, span)),
            Err(()) => {
                return Err(ParseError::Syntax {
                    message: format!("Unexpected character {:?}", &input[span.clone()]),
                    span,
                    expected: Vec::new(),
                })
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .expect("Should lex")
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_structure_keywords() {
        let tokens = kinds("extends include block append prepend mixin yield");
        assert_eq!(
            tokens,
            vec![
                Token::Extends,
                Token::Include,
                Token::Block,
                Token::Append,
                Token::Prepend,
                Token::Mixin,
                Token::Yield
            ]
        );
    }

    #[test]
    fn test_identifiers_and_strings() {
        let tokens = kinds(r#"content "my \"name\"" 'single'"#);
        assert_eq!(
            tokens,
            vec![
                Token::Ident("content".to_string()),
                Token::String("my \"name\"".to_string()),
                Token::String("single".to_string()),
            ]
        );
    }

    #[test]
    fn test_filter_chain_tokens() {
        let tokens = kinds(r#"include:upper:md "data.csv""#);
        assert_eq!(
            tokens,
            vec![
                Token::Include,
                Token::Colon,
                Token::Ident("upper".to_string()),
                Token::Colon,
                Token::Ident("md".to_string()),
                Token::String("data.csv".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = kinds("yield // comment\nyield");
        assert_eq!(tokens, vec![Token::Yield, Token::Yield]);
    }

    #[test]
    fn test_tokenize_rejects_unknown_character() {
        let err = tokenize("block a { ~ }").unwrap_err();
        assert!(err.to_string().contains("Unexpected character"));
    }
}
