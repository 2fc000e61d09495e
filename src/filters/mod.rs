//! Compile-time filter application
//!
//! `Filter` nodes and the filter chains of raw includes are rendered into
//! plain text before the document is linked.

pub mod builtin;
pub mod constant;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::error::{ErrorCode, TemplateError};
use crate::parser::ast::{Attribute, AttributeValue, Filter as FilterNode, Node, Position, RawInclude, Text};
use crate::walk::{walk, walk_nodes, Visit, Visitor, WalkOptions};

pub use constant::{ConstValue, ConstantEvaluator, LiteralEvaluator, NotConstant};

/// Failure reported by a filter implementation
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct FilterError {
    pub message: String,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Options passed to a filter: folded attributes plus the source file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOptions {
    pub attrs: BTreeMap<String, ConstValue>,
    pub filename: Option<PathBuf>,
}

impl FilterOptions {
    pub fn get(&self, name: &str) -> Option<&ConstValue> {
        self.attrs.get(name)
    }
}

pub trait Filter: Send + Sync {
    fn render(&self, text: &str, options: &FilterOptions) -> Result<String, FilterError>;

    /// Whether raw includes should hand this filter their undecoded bytes
    fn accepts_buffer(&self) -> bool {
        false
    }

    fn render_buffer(&self, raw: &[u8], options: &FilterOptions) -> Result<String, FilterError> {
        self.render(&String::from_utf8_lossy(raw), options)
    }
}

impl<F> Filter for F
where
    F: Fn(&str, &FilterOptions) -> Result<String, FilterError> + Send + Sync,
{
    fn render(&self, text: &str, options: &FilterOptions) -> Result<String, FilterError> {
        self(text, options)
    }
}

/// Registered filters, aliases and per-filter default options
#[derive(Clone)]
pub struct FilterConfig {
    filters: HashMap<String, Arc<dyn Filter>>,
    aliases: HashMap<String, String>,
    defaults: HashMap<String, BTreeMap<String, ConstValue>>,
    evaluator: Arc<dyn ConstantEvaluator>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut filters: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        filters.sort_unstable();
        f.debug_struct("FilterConfig")
            .field("filters", &filters)
            .field("aliases", &self.aliases)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl FilterConfig {
    /// An empty configuration using the literal evaluator
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
            aliases: HashMap::new(),
            defaults: HashMap::new(),
            evaluator: Arc::new(LiteralEvaluator),
        }
    }

    /// A configuration with `upper` and `base64` registered
    pub fn with_builtins() -> Self {
        Self::new()
            .with_filter("upper", builtin::Upper)
            .with_filter("base64", builtin::Base64)
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: impl Filter + 'static) -> Self {
        self.insert_filter(name, filter);
        self
    }

    pub fn insert_filter(&mut self, name: impl Into<String>, filter: impl Filter + 'static) {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    /// Default option for a filter, keyed by the name written in templates
    pub fn with_default_option(
        mut self,
        filter: impl Into<String>,
        option: impl Into<String>,
        value: ConstValue,
    ) -> Self {
        self.defaults
            .entry(filter.into())
            .or_default()
            .insert(option.into(), value);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl ConstantEvaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Follow one alias level; aliases of aliases are rejected
    fn resolve_name<'n>(&'n self, name: &'n str, position: &Position) -> Result<&'n str, TemplateError> {
        let Some(target) = self.aliases.get(name) else {
            return Ok(name);
        };
        if let Some(next) = self.aliases.get(target) {
            return Err(TemplateError::structural(
                ErrorCode::FilterAliasChain,
                format!(
                    "The filter \"{}\" is an alias for \"{}\", which is an alias for \"{}\". \
                     Chains of filter aliases are not supported.",
                    name, target, next
                ),
                position,
            ));
        }
        Ok(target)
    }

    fn lookup(&self, name: &str, position: &Position) -> Result<&Arc<dyn Filter>, TemplateError> {
        let resolved = self.resolve_name(name, position)?;
        self.filters.get(resolved).ok_or_else(|| {
            TemplateError::structural(
                ErrorCode::UnknownFilter,
                format!("filter \"{}\" does not exist", resolved),
                position,
            )
        })
    }

    /// Fold attributes, then add defaults for options the template did not set
    fn options(
        &self,
        name: &str,
        attrs: &[Attribute],
        filename: Option<PathBuf>,
        position: &Position,
    ) -> Result<FilterOptions, TemplateError> {
        let mut folded = BTreeMap::new();
        for attr in attrs {
            let value = match &attr.val {
                AttributeValue::Flag => ConstValue::Bool(true),
                AttributeValue::Expr(expr) => self.evaluator.evaluate(expr).map_err(|e| {
                    TemplateError::structural(
                        ErrorCode::FilterOptionNotConstant,
                        format!(
                            "{} All filters are rendered compile-time so filter options must be constants.",
                            e
                        ),
                        position,
                    )
                })?,
            };
            folded.insert(attr.name.clone(), value);
        }
        if let Some(defaults) = self.defaults.get(name) {
            for (option, value) in defaults {
                folded.entry(option.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(FilterOptions {
            attrs: folded,
            filename,
        })
    }

    fn render(&self, name: &str, text: &str, options: &FilterOptions, position: &Position) -> Result<String, TemplateError> {
        trace!(filter = name, at = %position, "applying filter");
        self.lookup(name, position)?
            .render(text, options)
            .map_err(|e| failed(name, e, position))
    }
}

fn failed(name: &str, err: FilterError, position: &Position) -> TemplateError {
    TemplateError::FilterFailed {
        name: name.to_string(),
        message: err.message,
        position: position.clone(),
    }
}

/// Render every filter in `ast` and in its loaded dependencies into text
pub fn apply_filters(mut ast: Node, config: &FilterConfig) -> Result<Node, TemplateError> {
    walk(&mut ast, &mut FilterResolver { config }, WalkOptions::with_dependencies())?;
    Ok(ast)
}

struct FilterResolver<'c> {
    config: &'c FilterConfig,
}

impl Visitor for FilterResolver<'_> {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node) -> Result<Visit, TemplateError> {
        match node {
            Node::Filter(filter) => {
                let text = self.render_filter(filter)?;
                Ok(Visit::Replace(Node::Text(Text::new(text, filter.position.clone()))))
            }
            Node::RawInclude(raw) if !raw.filters.is_empty() => {
                let text = self.render_raw_include(raw)?;
                Ok(Visit::Replace(Node::Text(Text::new(text, raw.position.clone()))))
            }
            _ => Ok(Visit::Continue),
        }
    }
}

impl FilterResolver<'_> {
    fn render_filter(&mut self, filter: &mut FilterNode) -> Result<String, TemplateError> {
        if matches!(filter.block.nodes.first(), Some(Node::Filter(_))) {
            walk_nodes(&mut filter.block.nodes, &mut *self, WalkOptions::with_dependencies())?;
        }
        let text: String = filter
            .block
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.val.as_str()),
                _ => None,
            })
            .collect();
        let options = self.config.options(
            &filter.name,
            &filter.attrs,
            filter.position.filename.clone(),
            &filter.position,
        )?;
        self.config.render(&filter.name, &text, &options, &filter.position)
    }

    /// The last filter of the chain sees the file; each earlier one sees the previous output
    fn render_raw_include(&mut self, raw: &mut RawInclude) -> Result<String, TemplateError> {
        let unloaded = || TemplateError::Unloaded {
            kind: "RawInclude",
            path: raw.file.path.clone(),
            position: raw.position.clone(),
        };
        let (Some(bytes), Some(text)) = (raw.file.raw.as_deref(), raw.file.text.as_deref()) else {
            return Err(unloaded());
        };
        let filename = raw.file.full_path.clone();

        let mut chain = raw.filters.iter().rev();
        let Some(first) = chain.next() else {
            return Ok(text.to_string());
        };
        let options = self
            .config
            .options(&first.name, &first.attrs, filename.clone(), &first.position)?;
        let filter = self.config.lookup(&first.name, &first.position)?;
        trace!(filter = %first.name, at = %first.position, buffer = filter.accepts_buffer(), "applying filter");
        let mut output = if filter.accepts_buffer() {
            filter.render_buffer(bytes, &options)
        } else {
            filter.render(text, &options)
        }
        .map_err(|e| failed(&first.name, e, &first.position))?;

        for next in chain {
            let options = self
                .config
                .options(&next.name, &next.attrs, filename.clone(), &next.position)?;
            output = self.config.render(&next.name, &output, &options, &next.position)?;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::ast::{collect_text, Block, FileReference, IncludeFilter};
    use crate::parser::{parse_source, SourceFile};

    fn parse(src: &str) -> Node {
        parse_source(&SourceFile::new(src, Some("/views/page.tmpl".into()))).unwrap()
    }

    fn text_of(node: &Node) -> String {
        collect_text(std::slice::from_ref(node))
    }

    fn raw_include(filters: &[&str], content: &[u8]) -> Node {
        let mut file = FileReference::new("data.csv", Some("/views/page.tmpl".into()));
        file.full_path = Some("/views/data.csv".into());
        file.raw = Some(content.to_vec());
        file.text = Some(String::from_utf8_lossy(content).into_owned());
        Node::Block(Block::new(
            vec![Node::RawInclude(RawInclude {
                file,
                filters: filters
                    .iter()
                    .map(|name| IncludeFilter {
                        name: name.to_string(),
                        attrs: Vec::new(),
                        position: Position::default(),
                    })
                    .collect(),
                position: Position::default(),
            })],
            Position::default(),
        ))
    }

    #[test]
    fn test_filter_node_becomes_text() {
        let config = FilterConfig::with_builtins();
        let out = apply_filters(parse(r#"div { :upper { "hello " "world" } }"#), &config).unwrap();
        assert_eq!(text_of(&out), "HELLO WORLD");
    }

    #[test]
    fn test_nested_leading_filter_is_rendered_first() {
        let config = FilterConfig::with_builtins().with_filter("wrap", |text: &str, _: &FilterOptions| -> Result<String, FilterError> {
            Ok(format!("[{}]", text))
        });
        let out = apply_filters(parse(r#":wrap { :upper { "x" } "y" }"#), &config).unwrap();
        assert_eq!(text_of(&out), "[Xy]");
    }

    #[test]
    fn test_attributes_are_folded_and_defaults_merged() {
        let seen = Arc::new(Mutex::new(None));
        let recorder = Arc::clone(&seen);
        let config = FilterConfig::new()
            .with_filter("md", move |_: &str, options: &FilterOptions| -> Result<String, FilterError> {
                *recorder.lock().unwrap() = Some(options.clone());
                Ok(String::new())
            })
            .with_default_option("md", "flavor", ConstValue::String("commonmark".into()))
            .with_default_option("md", "smart", ConstValue::Bool(false));
        apply_filters(parse(r#":md(flavor="gfm", pretty, depth=-1) { "" }"#), &config).unwrap();

        let options = seen.lock().unwrap().clone().unwrap();
        assert_eq!(options.get("flavor"), Some(&ConstValue::String("gfm".into())));
        assert_eq!(options.get("smart"), Some(&ConstValue::Bool(false)));
        assert_eq!(options.get("pretty"), Some(&ConstValue::Bool(true)));
        assert_eq!(options.get("depth"), Some(&ConstValue::Number(-1.0)));
        assert_eq!(options.filename.as_deref(), Some(Path::new("/views/page.tmpl")));
    }

    #[test]
    fn test_non_constant_attribute() {
        let config = FilterConfig::with_builtins();
        let err = apply_filters(parse(r#":upper(level=depth) { "x" }"#), &config).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FilterOptionNotConstant));
        assert!(err.to_string().contains("depth is not constant."));
    }

    #[test]
    fn test_single_alias_resolves() {
        let config = FilterConfig::new()
            .with_filter("a", |_: &str, _: &FilterOptions| -> Result<String, FilterError> { Ok("from a".to_string()) })
            .with_alias("b", "a");
        let out = apply_filters(parse(r#":b { "x" }"#), &config).unwrap();
        assert_eq!(text_of(&out), "from a");
    }

    #[test]
    fn test_alias_chain_is_rejected() {
        let config = FilterConfig::new()
            .with_filter("c", |t: &str, _: &FilterOptions| -> Result<String, FilterError> { Ok(t.to_string()) })
            .with_alias("b", "a")
            .with_alias("a", "c");
        let err = apply_filters(parse(r#":b { "x" }"#), &config).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FilterAliasChain));
    }

    #[test]
    fn test_unknown_filter() {
        let err = apply_filters(parse(r#":nope { "x" }"#), &FilterConfig::new()).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnknownFilter));
        assert!(err.to_string().contains("filter \"nope\" does not exist"));
    }

    #[test]
    fn test_raw_include_chain_runs_last_declared_first() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (upper_calls, markdown_calls) = (Arc::clone(&calls), Arc::clone(&calls));
        let config = FilterConfig::new()
            .with_filter("upper", move |text: &str, options: &FilterOptions| -> Result<String, FilterError> {
                upper_calls.lock().unwrap().push(("upper", text.to_string(), options.filename.clone()));
                Ok(text.to_uppercase())
            })
            .with_filter("markdown", move |text: &str, options: &FilterOptions| -> Result<String, FilterError> {
                markdown_calls
                    .lock()
                    .unwrap()
                    .push(("markdown", text.to_string(), options.filename.clone()));
                Ok(format!("<p>{}</p>", text))
            });

        let out = apply_filters(raw_include(&["markdown", "upper"], b"a,b"), &config).unwrap();
        assert_eq!(text_of(&out), "<p>A,B</p>");
        let file = Some(PathBuf::from("/views/data.csv"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                ("upper", "a,b".to_string(), file.clone()),
                ("markdown", "A,B".to_string(), file),
            ]
        );
    }

    #[test]
    fn test_buffer_filter_receives_raw_bytes() {
        let config = FilterConfig::with_builtins();
        let out = apply_filters(raw_include(&["upper", "base64"], &[0xff, 0x00, 0x41]), &config).unwrap();
        assert_eq!(text_of(&out), "/WBB");
    }

    #[test]
    fn test_failing_filter_carries_name() {
        let config = FilterConfig::new()
            .with_filter("strict", |_: &str, _: &FilterOptions| -> Result<String, FilterError> {
                Err(FilterError::new("bad input"))
            });
        let err = apply_filters(parse("\n:strict { \"x\" }"), &config).unwrap_err();
        match err {
            TemplateError::FilterFailed { name, message, position } => {
                assert_eq!(name, "strict");
                assert_eq!(message, "bad input");
                assert_eq!(position.line, 2);
            }
            other => panic!("Expected filter failure, got {:?}", other),
        }
    }
}
