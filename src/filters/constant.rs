//! Compile-time constant folding of filter attribute values

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use crate::parser::lexer::{tokenize, Token};

/// A folded attribute or default option value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ConstValue>),
    Null,
}

impl ConstValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConstValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Number(n) => write!(f, "{}", n),
            ConstValue::String(s) => f.write_str(s),
            ConstValue::Array(items) => {
                let items: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                f.write_str(&items.join(","))
            }
            ConstValue::Null => f.write_str("null"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{expr} is not constant.")]
pub struct NotConstant {
    pub expr: String,
}

/// Folds an attribute expression to a value, or rejects it
pub trait ConstantEvaluator: Send + Sync {
    fn evaluate(&self, expr: &str) -> Result<ConstValue, NotConstant>;
}

/// Accepts string, number, boolean and null literals and arrays of them
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralEvaluator;

impl ConstantEvaluator for LiteralEvaluator {
    fn evaluate(&self, expr: &str) -> Result<ConstValue, NotConstant> {
        let not_constant = || NotConstant {
            expr: expr.trim().to_string(),
        };
        let tokens = tokenize(expr).map_err(|_| not_constant())?;
        let len = expr.len();
        let token_stream = Stream::from_iter(
            tokens
                .into_iter()
                .map(|(tok, span)| (tok, SimpleSpan::from(span))),
        )
        .map((len..len).into(), |(t, s): (_, _)| (t, s));

        literal_parser()
            .parse(token_stream)
            .into_result()
            .map_err(|_| not_constant())
    }
}

fn literal_parser<'a, I>() -> impl Parser<'a, I, ConstValue, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let value = recursive(|value| {
        let scalar = select! {
            Token::String(s) => ConstValue::String(s),
            Token::Number(n) => ConstValue::Number(n),
            Token::Ident(s) if s == "true" => ConstValue::Bool(true),
            Token::Ident(s) if s == "false" => ConstValue::Bool(false),
            Token::Ident(s) if s == "null" || s == "undefined" => ConstValue::Null,
        };

        let negative = just(Token::Minus).ignore_then(select! {
            Token::Number(n) => ConstValue::Number(-n),
        });

        let array = value
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(ConstValue::Array);

        choice((scalar, negative, array))
    });

    value.then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> Result<ConstValue, NotConstant> {
        LiteralEvaluator.evaluate(expr)
    }

    #[test]
    fn test_scalars() {
        assert_eq!(eval(r#""gfm""#), Ok(ConstValue::String("gfm".to_string())));
        assert_eq!(eval("'single'"), Ok(ConstValue::String("single".to_string())));
        assert_eq!(eval("2.5"), Ok(ConstValue::Number(2.5)));
        assert_eq!(eval("-2"), Ok(ConstValue::Number(-2.0)));
        assert_eq!(eval("true"), Ok(ConstValue::Bool(true)));
        assert_eq!(eval("undefined"), Ok(ConstValue::Null));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(
            eval("['a', [1, false],]"),
            Ok(ConstValue::Array(vec![
                ConstValue::String("a".to_string()),
                ConstValue::Array(vec![ConstValue::Number(1.0), ConstValue::Bool(false)]),
            ]))
        );
    }

    #[test]
    fn test_non_constants_are_rejected() {
        for expr in ["user", "a + 1", "\"a\" \"b\"", "[x]", "~"] {
            let err = eval(expr).unwrap_err();
            assert_eq!(err.to_string(), format!("{} is not constant.", expr));
        }
    }

    #[test]
    fn test_deserialize_untagged() {
        #[derive(Deserialize)]
        struct Options {
            flavor: ConstValue,
            level: ConstValue,
            smart: ConstValue,
        }
        let options: Options = toml::from_str("flavor = \"gfm\"\nlevel = 2\nsmart = true").unwrap();
        assert_eq!(options.flavor, ConstValue::String("gfm".to_string()));
        assert_eq!(options.level, ConstValue::Number(2.0));
        assert_eq!(options.smart, ConstValue::Bool(true));
    }
}
