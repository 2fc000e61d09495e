//! Parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::parser::ast::*;
use crate::parser::lexer::{Token, Tokens};
use crate::parser::SourceFile;

/// Extension of parsed templates; includes of any other file are raw
pub const TEMPLATE_EXTENSION: &str = "tmpl";

/// Maps byte offsets to 1-based line numbers and keeps the source for slicing
struct SourceMap<'s> {
    file: &'s SourceFile,
    line_starts: Vec<usize>,
}

impl<'s> SourceMap<'s> {
    fn new(file: &'s SourceFile) -> Self {
        let line_starts = std::iter::once(0)
            .chain(file.text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { file, line_starts }
    }

    fn line(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    fn position(&self, span: SimpleSpan) -> Position {
        Position::new(self.file.filename.clone(), self.line(span.start))
    }

    fn slice(&self, span: SimpleSpan) -> &'s str {
        self.file.text.get(span.start..span.end).unwrap_or("")
    }
}

/// Parse lexed tokens into a document rooted at a `Block`
pub fn parse(tokens: Tokens, file: &SourceFile) -> Result<Node, Vec<crate::ParseError>> {
    let len = file.text.len();
    let map = SourceMap::new(file);

    let token_iter = tokens
        .into_iter()
        .map(|(tok, span)| (tok, SimpleSpan::from(span)));

    // Turn the token iterator into a stream that chumsky can use
    let token_stream = Stream::from_iter(token_iter)
        // Split (Token, SimpleSpan) into token and span parts
        .map((len..len).into(), |(t, s): (_, _)| (t, s));

    let result = document_parser(&map)
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect());
    result
}

fn document_parser<'a, I>(
    map: &'a SourceMap<'a>,
) -> impl Parser<'a, I, Node, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let ident = select! { Token::Ident(s) => s };
    let string = select! { Token::String(s) => s };

    // Attribute values keep their source text up to the next top-level `,` or `)`;
    // whether a value is constant is decided in the filter pass
    let group = recursive(|group| {
        let inner = choice((group, any().filter(|t: &Token| !is_delimiter(t)).ignored())).repeated();
        choice((
            inner
                .clone()
                .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
            inner
                .clone()
                .delimited_by(just(Token::BracketOpen), just(Token::BracketClose)),
            inner.delimited_by(just(Token::BraceOpen), just(Token::BraceClose)),
        ))
    });
    let value = choice((
        group,
        any()
            .filter(|t: &Token| *t != Token::Comma && !is_delimiter(t))
            .ignored(),
    ))
    .repeated()
    .at_least(1)
    .map_with(move |_, e| map.slice(e.span()).trim().to_string());

    let attribute = ident
        .clone()
        .then(just(Token::Equals).ignore_then(value).or_not())
        .map(|(name, val)| Attribute {
            name,
            val: val.map(AttributeValue::Expr).unwrap_or(AttributeValue::Flag),
        });

    let attrs = attribute
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

    // Mixin arguments are kept verbatim
    let args = any()
        .filter(|t: &Token| *t != Token::ParenClose)
        .repeated()
        .collect::<Vec<_>>()
        .map_with(move |_, e| map.slice(e.span()).trim().to_string())
        .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

    let block_mode = choice((
        just(Token::Append).to(BlockMode::Append),
        just(Token::Prepend).to(BlockMode::Prepend),
        just(Token::Replace).to(BlockMode::Replace),
    ));

    let statement = recursive(|stmt| {
        let body = stmt
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BraceOpen), just(Token::BraceClose));

        // extends "layout.tmpl"
        let extends = just(Token::Extends)
            .ignore_then(string.clone())
            .map_with(move |path, e| {
                Node::Extends(Extends {
                    file: FileReference::new(path, map.file.filename.clone()),
                    position: map.position(e.span()),
                })
            });

        // :name(attrs) inside an include
        let include_filter = just(Token::Colon)
            .ignore_then(ident.clone())
            .then(attrs.clone().or_not())
            .map_with(move |(name, attrs), e| IncludeFilter {
                name,
                attrs: attrs.unwrap_or_default(),
                position: map.position(e.span()),
            });

        // include "part.tmpl" { ... } / include:filter "data.txt"
        let include = just(Token::Include)
            .ignore_then(include_filter.repeated().collect::<Vec<_>>())
            .then(string.clone())
            .then(body.clone().or_not())
            .try_map(move |((filters, path), block), span: SimpleSpan| {
                let position = map.position(span);
                let file = FileReference::new(path, map.file.filename.clone());
                let parsed = filters.is_empty()
                    && std::path::Path::new(&file.path)
                        .extension()
                        .is_some_and(|ext| ext == TEMPLATE_EXTENSION);
                if parsed {
                    let block = block.map(|nodes| Block::new(nodes, position.clone()));
                    return Ok(Node::Include(Include {
                        file,
                        block,
                        position,
                    }));
                }
                if block.is_some() {
                    return Err(Rich::custom(
                        span,
                        "Raw includes cannot have a body",
                    ));
                }
                Ok(Node::RawInclude(RawInclude {
                    file,
                    filters,
                    position,
                }))
            });

        // block [mode] name { ... } / append name { ... } / prepend name { ... }
        let named_block = choice((
            just(Token::Block)
                .ignore_then(block_mode.clone().or_not())
                .map(|mode| mode.unwrap_or_default()),
            just(Token::Append).to(BlockMode::Append),
            just(Token::Prepend).to(BlockMode::Prepend),
        ))
        .then(ident.clone())
        .then(body.clone())
        .map_with(move |((mode, name), nodes), e| {
            Node::NamedBlock(NamedBlock::new(name, mode, nodes, map.position(e.span())))
        });

        let mixin_def = just(Token::Mixin)
            .ignore_then(ident.clone())
            .then(args.clone().or_not())
            .then(body.clone())
            .map_with(move |((name, args), nodes), e| {
                let position = map.position(e.span());
                Node::Mixin(Mixin {
                    name,
                    args,
                    call: false,
                    block: Some(Block::new(nodes, position.clone())),
                    position,
                })
            });

        let mixin_call = just(Token::Plus)
            .ignore_then(ident.clone())
            .then(args.clone().or_not())
            .then(body.clone().or_not())
            .map_with(move |((name, args), nodes), e| {
                let position = map.position(e.span());
                Node::Mixin(Mixin {
                    name,
                    args,
                    call: true,
                    block: nodes.map(|nodes| Block::new(nodes, position.clone())),
                    position,
                })
            });

        let filter = just(Token::Colon)
            .ignore_then(ident.clone())
            .then(attrs.clone().or_not())
            .then(body.clone())
            .map_with(move |((name, attrs), nodes), e| {
                let position = map.position(e.span());
                Node::Filter(Filter {
                    name,
                    attrs: attrs.unwrap_or_default(),
                    block: Block::new(nodes, position.clone()),
                    position,
                })
            });

        let yield_point = just(Token::Yield).map_with(move |_, e| {
            Node::YieldBlock(YieldBlock {
                position: map.position(e.span()),
            })
        });

        let text = string
            .clone()
            .map_with(move |val, e| Node::Text(Text::new(val, map.position(e.span()))));

        // div { ... } / script. { "raw" }
        let tag = ident
            .clone()
            .then(just(Token::Dot).or_not())
            .then(body.clone().or_not())
            .map_with(move |((name, dot), nodes), e| {
                let position = map.position(e.span());
                Node::Tag(Tag {
                    name,
                    text_only: dot.is_some(),
                    block: Block::new(nodes.unwrap_or_default(), position.clone()),
                    position,
                })
            });

        let anonymous = body.map_with(move |nodes, e| {
            Node::Block(Block::new(nodes, map.position(e.span())))
        });

        // Keyword-led statements first; tag matches any identifier
        choice((
            extends,
            include,
            named_block,
            mixin_def,
            mixin_call,
            filter,
            yield_point,
            text,
            tag,
            anonymous,
        ))
        .boxed()
    });

    // Document is a list of statements
    statement
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map(move |nodes| Node::Block(Block::new(nodes, Position::new(map.file.filename.clone(), 1))))
}

fn is_delimiter(token: &Token) -> bool {
    matches!(
        token,
        Token::ParenOpen
            | Token::ParenClose
            | Token::BracketOpen
            | Token::BracketClose
            | Token::BraceOpen
            | Token::BraceClose
    )
}
