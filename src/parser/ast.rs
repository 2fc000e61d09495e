//! Abstract Syntax Tree types for templates

use std::fmt::Write as _;
use std::path::PathBuf;

/// Source location of a node, used for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub filename: Option<PathBuf>,
    pub line: usize,
}

impl Position {
    pub fn new(filename: Option<PathBuf>, line: usize) -> Self {
        Self { filename, line }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.filename {
            Some(file) => write!(f, "{} line {}", file.display(), self.line),
            None => write!(f, "<anonymous> line {}", self.line),
        }
    }
}

/// Identity of a named block within one link session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// How a named block combines with the same-named block of its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

impl BlockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockMode::Replace => "replace",
            BlockMode::Append => "append",
            BlockMode::Prepend => "prepend",
        }
    }
}

/// A template syntax tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Anonymous container
    Block(Block),
    /// Overridable container: `block append name { ... }`
    NamedBlock(NamedBlock),
    /// `extends "parent.tmpl"`
    Extends(Extends),
    /// `include "part.tmpl" { ... }`
    Include(Include),
    /// `include:filter "data.txt"`
    RawInclude(RawInclude),
    /// Mixin definition or call
    Mixin(Mixin),
    /// `:name(attrs) { ... }`
    Filter(Filter),
    /// `yield`
    YieldBlock(YieldBlock),
    /// Literal text
    Text(Text),
    /// Element with a nested block
    Tag(Tag),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
    pub position: Position,
}

impl Block {
    pub fn new(nodes: Vec<Node>, position: Position) -> Self {
        Self { nodes, position }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedBlock {
    pub name: String,
    pub mode: BlockMode,
    pub nodes: Vec<Node>,
    pub position: Position,
    /// Assigned when the block is registered during linking
    pub id: Option<BlockId>,
    /// Ancestor blocks this block was merged into, ancestor-first.
    /// Set by the merge step; never owning.
    pub parents: Option<Vec<BlockId>>,
    /// Set when the block name was already active when this block was reached
    pub ignore: bool,
}

impl NamedBlock {
    pub fn new(name: impl Into<String>, mode: BlockMode, nodes: Vec<Node>, position: Position) -> Self {
        Self {
            name: name.into(),
            mode,
            nodes,
            position,
            id: None,
            parents: None,
            ignore: false,
        }
    }
}

/// A reference from one template to another file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileReference {
    /// Path as written in the template
    pub path: String,
    /// File containing the reference, for relative resolution
    pub filename: Option<PathBuf>,
    pub full_path: Option<PathBuf>,
    pub raw: Option<Vec<u8>>,
    pub text: Option<String>,
    /// Loaded document, for parsed references
    pub ast: Option<Box<Node>>,
}

impl FileReference {
    pub fn new(path: impl Into<String>, filename: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filename,
            ..Self::default()
        }
    }

    /// Whether the loader has already populated this reference
    pub fn is_loaded(&self) -> bool {
        self.text.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extends {
    pub file: FileReference,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub file: FileReference,
    /// Content spliced into the included document's yield point
    pub block: Option<Block>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawInclude {
    pub file: FileReference,
    /// Filter chain in declaration order
    pub filters: Vec<IncludeFilter>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeFilter {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mixin {
    pub name: String,
    /// Raw argument list, without parentheses
    pub args: Option<String>,
    /// `true` for `+name(...)`, `false` for a definition
    pub call: bool,
    pub block: Option<Block>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub block: Block,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub val: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Attribute written without a value
    Flag,
    /// Source text of the value expression
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct YieldBlock {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Text {
    pub val: String,
    pub position: Position,
}

impl Text {
    pub fn new(val: impl Into<String>, position: Position) -> Self {
        Self {
            val: val.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    /// Body is raw text only (`script. { ... }`)
    pub text_only: bool,
    pub block: Block,
    pub position: Position,
}

impl Node {
    /// Variant name, as used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Block(_) => "Block",
            Node::NamedBlock(_) => "NamedBlock",
            Node::Extends(_) => "Extends",
            Node::Include(_) => "Include",
            Node::RawInclude(_) => "RawInclude",
            Node::Mixin(_) => "Mixin",
            Node::Filter(_) => "Filter",
            Node::YieldBlock(_) => "YieldBlock",
            Node::Text(_) => "Text",
            Node::Tag(_) => "Tag",
        }
    }

    pub fn position(&self) -> &Position {
        match self {
            Node::Block(n) => &n.position,
            Node::NamedBlock(n) => &n.position,
            Node::Extends(n) => &n.position,
            Node::Include(n) => &n.position,
            Node::RawInclude(n) => &n.position,
            Node::Mixin(n) => &n.position,
            Node::Filter(n) => &n.position,
            Node::YieldBlock(n) => &n.position,
            Node::Text(n) => &n.position,
            Node::Tag(n) => &n.position,
        }
    }

    /// Nodes whose body is raw text and never receives yielded content
    pub fn is_text_only(&self) -> bool {
        matches!(self, Node::Tag(tag) if tag.text_only)
    }

    /// The nested `block` of variants that carry one
    pub fn nested_block(&self) -> Option<&Block> {
        match self {
            Node::Mixin(m) => m.block.as_ref(),
            Node::Filter(f) => Some(&f.block),
            Node::Tag(t) => Some(&t.block),
            Node::Include(i) => i.block.as_ref(),
            Node::Block(_)
            | Node::NamedBlock(_)
            | Node::Extends(_)
            | Node::RawInclude(_)
            | Node::YieldBlock(_)
            | Node::Text(_) => None,
        }
    }

    pub fn nested_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Node::Mixin(m) => m.block.as_mut(),
            Node::Filter(f) => Some(&mut f.block),
            Node::Tag(t) => Some(&mut t.block),
            Node::Include(i) => i.block.as_mut(),
            _ => None,
        }
    }

    /// The file reference of `Extends`, `Include` and `RawInclude`
    pub fn file_mut(&mut self) -> Option<&mut FileReference> {
        match self {
            Node::Extends(n) => Some(&mut n.file),
            Node::Include(n) => Some(&mut n.file),
            Node::RawInclude(n) => Some(&mut n.file),
            _ => None,
        }
    }
}

/// Render nodes as an indented outline, one node per line
pub fn outline(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        outline_node(node, 0, &mut out);
    }
    out
}

fn outline_node(node: &Node, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let children: Vec<&Node> = match node {
        Node::Block(b) => {
            let _ = writeln!(out, "{}block", indent);
            b.nodes.iter().collect()
        }
        Node::NamedBlock(b) => {
            let ignored = if b.ignore { " ignored" } else { "" };
            let _ = writeln!(out, "{}block {} ({}){}", indent, b.name, b.mode.as_str(), ignored);
            b.nodes.iter().collect()
        }
        Node::Extends(e) => {
            let _ = writeln!(out, "{}extends {:?}", indent, e.file.path);
            Vec::new()
        }
        Node::Include(i) => {
            let _ = writeln!(out, "{}include {:?}", indent, i.file.path);
            i.block.iter().flat_map(|b| b.nodes.iter()).collect()
        }
        Node::RawInclude(r) => {
            let filters: String = r.filters.iter().map(|f| format!(":{}", f.name)).collect();
            let _ = writeln!(out, "{}include{} {:?}", indent, filters, r.file.path);
            Vec::new()
        }
        Node::Mixin(m) => {
            let sigil = if m.call { "+" } else { "mixin " };
            let args = m.args.as_deref().map(|a| format!("({})", a)).unwrap_or_default();
            let _ = writeln!(out, "{}{}{}{}", indent, sigil, m.name, args);
            m.block.iter().flat_map(|b| b.nodes.iter()).collect()
        }
        Node::Filter(f) => {
            let _ = writeln!(out, "{}:{}", indent, f.name);
            f.block.nodes.iter().collect()
        }
        Node::YieldBlock(_) => {
            let _ = writeln!(out, "{}yield", indent);
            Vec::new()
        }
        Node::Text(t) => {
            let _ = writeln!(out, "{}text {:?}", indent, t.val);
            Vec::new()
        }
        Node::Tag(t) => {
            let dot = if t.text_only { "." } else { "" };
            let _ = writeln!(out, "{}{}{}", indent, t.name, dot);
            t.block.nodes.iter().collect()
        }
    };
    for child in children {
        outline_node(child, depth + 1, out);
    }
}

/// Concatenate every text node in document order
pub fn collect_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        collect_text_into(node, &mut out);
    }
    out
}

fn collect_text_into(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) => out.push_str(&t.val),
        Node::Block(b) => b.nodes.iter().for_each(|n| collect_text_into(n, out)),
        Node::NamedBlock(b) => b.nodes.iter().for_each(|n| collect_text_into(n, out)),
        // Mixin definitions only render where they are called
        Node::Mixin(m) if !m.call => {}
        other => {
            if let Some(block) = other.nested_block() {
                block.nodes.iter().for_each(|n| collect_text_into(n, out));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(val: &str) -> Node {
        Node::Text(Text::new(val, Position::default()))
    }

    #[test]
    fn test_outline_nested_blocks() {
        let nodes = vec![Node::NamedBlock(NamedBlock::new(
            "content",
            BlockMode::Append,
            vec![text("X")],
            Position::default(),
        ))];
        assert_eq!(outline(&nodes), "block content (append)\n  text \"X\"\n");
    }

    #[test]
    fn test_collect_text_skips_mixin_definitions() {
        let nodes = vec![
            text("a"),
            Node::Mixin(Mixin {
                name: "card".to_string(),
                args: None,
                call: false,
                block: Some(Block::new(vec![text("hidden")], Position::default())),
                position: Position::default(),
            }),
            Node::Block(Block::new(vec![text("b")], Position::default())),
        ];
        assert_eq!(collect_text(&nodes), "ab");
    }

    #[test]
    fn test_text_only_tag() {
        let tag = Node::Tag(Tag {
            name: "script".to_string(),
            text_only: true,
            block: Block::default(),
            position: Position::default(),
        });
        assert!(tag.is_text_only());
        assert!(!text("x").is_text_only());
    }
}
