//! Links a loaded document into one self-contained tree
//!
//! Linking detaches a leading `extends`, expands includes, links the parent
//! document and merges the child's named blocks into it. Mixin definitions of
//! an extending document are hoisted to the top of the parent.

mod blocks;
mod includes;

use tracing::debug;

use crate::error::{ErrorCode, TemplateError};
use crate::parser::ast::{Block, Extends, Node, Position};
use crate::walk::{walk_nodes, Hooks, Visit, WalkOptions};

pub use blocks::DeclaredBlocks;

/// Result of linking one document
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedDocument {
    pub root: Block,
    pub declared_blocks: DeclaredBlocks,
    /// The document was produced by merging into an extended parent
    pub has_extends: bool,
}

impl LinkedDocument {
    pub fn into_node(self) -> Node {
        Node::Block(self.root)
    }
}

/// Link a loaded document
pub fn link(ast: Node) -> Result<LinkedDocument, TemplateError> {
    LinkSession::default().link_node(ast)
}

/// State shared by the recursive links of one top-level link call
#[derive(Debug, Default)]
pub(crate) struct LinkSession {
    next_block_id: u32,
}

impl LinkSession {
    pub(crate) fn link_node(&mut self, ast: Node) -> Result<LinkedDocument, TemplateError> {
        let mut root = match ast {
            Node::Block(block) => block,
            other => return Err(TemplateError::NotABlock { found: other.kind() }),
        };

        let extends = detach_extends(&mut root);
        check_extends_position(&mut root)?;

        includes::apply_includes(&mut root, self)?;
        let mut declared_blocks = blocks::declare_blocks(&mut root, &mut self.next_block_id);

        let Some(Extends { file, position }) = extends else {
            return Ok(LinkedDocument {
                root,
                declared_blocks,
                has_extends: false,
            });
        };

        let expected = check_extending_root(&root.nodes)?;

        let parent_ast = file.ast.ok_or_else(|| TemplateError::Unloaded {
            kind: "Extends",
            path: file.path.clone(),
            position: position.clone(),
        })?;
        debug!(parent = %file.path, at = %position, "linking extended template");
        let mut parent = self.link_node(*parent_ast)?;

        blocks::merge(
            &mut parent.root,
            &parent.declared_blocks,
            &mut root,
            &mut declared_blocks,
        );

        let found = blocks::block_names(&mut parent.root);
        if let Some((name, position)) = expected.iter().find(|(name, _)| !found.contains(name)) {
            return Err(TemplateError::structural(
                ErrorCode::UnexpectedBlock,
                format!("Unexpected block {}", name),
                position,
            ));
        }

        parent.declared_blocks.overlay(declared_blocks);
        let mut nodes = collect_mixins(root.nodes);
        nodes.append(&mut parent.root.nodes);
        parent.root.nodes = nodes;
        parent.has_extends = true;
        Ok(parent)
    }
}

fn detach_extends(root: &mut Block) -> Option<Extends> {
    if !matches!(root.nodes.first(), Some(Node::Extends(_))) {
        return None;
    }
    match root.nodes.remove(0) {
        Node::Extends(extends) => Some(extends),
        _ => None,
    }
}

/// Any `extends` left after detaching the leading one is misplaced
fn check_extends_position(root: &mut Block) -> Result<(), TemplateError> {
    let mut hooks = Hooks::pre(|node: &mut Node| match node {
        Node::Extends(extends) => Err(TemplateError::structural(
            ErrorCode::ExtendsNotFirst,
            "Declaration of template inheritance (\"extends\") should be the first thing in the file. \
             There can only be one extends statement per file.",
            &extends.position,
        )),
        _ => Ok(Visit::Continue),
    });
    walk_nodes(&mut root.nodes, &mut hooks, WalkOptions::default())
}

/// Validate the top level of an extending document and return its named blocks
fn check_extending_root(nodes: &[Node]) -> Result<Vec<(String, Position)>, TemplateError> {
    let mut expected = Vec::new();
    for node in nodes {
        match node {
            Node::NamedBlock(block) => expected.push((block.name.clone(), block.position.clone())),
            Node::Block(block) => expected.extend(check_extending_root(&block.nodes)?),
            Node::Mixin(mixin) if !mixin.call => {}
            other => {
                return Err(TemplateError::structural(
                    ErrorCode::UnexpectedNodesInExtendingRoot,
                    "Only named blocks and mixins can appear at the top level of an extending template",
                    other.position(),
                ))
            }
        }
    }
    Ok(expected)
}

/// Mixin definitions at the top level of an extending document, in order
fn collect_mixins(nodes: Vec<Node>) -> Vec<Node> {
    let mut mixins = Vec::new();
    for node in nodes {
        match node {
            Node::Mixin(ref mixin) if !mixin.call => mixins.push(node),
            Node::Block(block) => mixins.extend(collect_mixins(block.nodes)),
            _ => {}
        }
    }
    mixins
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::loader::{load_file, CapabilitiesBuilder};
    use crate::parser::ast::{collect_text, outline};
    use crate::parser::{parse_source, SourceFile};

    fn load(files: &[(&str, &str)], entry: &str) -> Node {
        let files: HashMap<PathBuf, Vec<u8>> = files
            .iter()
            .map(|(path, text)| (PathBuf::from(path), text.as_bytes().to_vec()))
            .collect();
        let caps = CapabilitiesBuilder::with_default_syntax()
            .basedir("/")
            .read(move |path: &Path| {
                files
                    .get(path)
                    .cloned()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
            })
            .build()
            .unwrap();
        load_file(entry, &caps).unwrap()
    }

    fn link_files(files: &[(&str, &str)], entry: &str) -> Result<LinkedDocument, TemplateError> {
        link(load(files, entry))
    }

    #[test]
    fn test_non_block_root_is_rejected() {
        let err = link(Node::YieldBlock(Default::default())).unwrap_err();
        assert!(matches!(err, TemplateError::NotABlock { found: "YieldBlock" }));
    }

    #[test]
    fn test_document_without_extends_is_unchanged() {
        let src = r#"block head { "h" } div { block body { "b" } } "tail""#;
        let file = SourceFile::new(src, Some("/page.tmpl".into()));
        let parsed = parse_source(&file).unwrap();
        let linked = link(parsed.clone()).unwrap();
        assert!(!linked.has_extends);
        assert_eq!(outline(std::slice::from_ref(&linked.clone().into_node())), outline(&[parsed]));
        assert_eq!(linked.declared_blocks.names(), vec!["body", "head"]);
    }

    #[test]
    fn test_append_to_parent_block() {
        let linked = link_files(
            &[
                ("/child.tmpl", r#"extends "base.tmpl" block append content { "X" }"#),
                ("/base.tmpl", r#"block content { "Y" }"#),
            ],
            "/child.tmpl",
        )
        .unwrap();
        assert!(linked.has_extends);
        assert_eq!(
            outline(&linked.root.nodes),
            "block content (replace)\n  text \"Y\"\n  text \"X\"\n"
        );
    }

    #[test]
    fn test_three_level_chain_leaves_unrelated_blocks() {
        let linked = link_files(
            &[
                ("/a.tmpl", r#"extends "b.tmpl" append content { "A" }"#),
                ("/b.tmpl", r#"extends "c.tmpl" block sidebar { "B side" }"#),
                ("/c.tmpl", r#"block content { "C" } block sidebar { "C side" } block footer { "F" }"#),
            ],
            "/a.tmpl",
        )
        .unwrap();
        assert_eq!(collect_text(&linked.root.nodes), "CAB sideF");
    }

    #[test]
    fn test_middle_replace_is_reached_through_lineage() {
        let linked = link_files(
            &[
                ("/a.tmpl", r#"extends "b.tmpl" append content { "A" }"#),
                ("/b.tmpl", r#"extends "c.tmpl" block content { "B" }"#),
                ("/c.tmpl", r#"div { block content { "C" } }"#),
            ],
            "/a.tmpl",
        )
        .unwrap();
        assert_eq!(collect_text(&linked.root.nodes), "BA");
        let ids = linked.declared_blocks.get("content");
        assert_eq!(ids.len(), 1);
        assert!(linked.declared_blocks.parents_of(ids[0]).is_some());
    }

    #[test]
    fn test_mixins_are_hoisted_into_parent() {
        let linked = link_files(
            &[
                ("/child.tmpl", r#"extends "base.tmpl" mixin card { "card" } block content { +card }"#),
                ("/base.tmpl", r#""start" block content { }"#),
            ],
            "/child.tmpl",
        )
        .unwrap();
        assert_eq!(
            outline(&linked.root.nodes),
            "mixin card\n  text \"card\"\ntext \"start\"\nblock content (replace)\n  +card\n"
        );
    }

    #[test]
    fn test_extends_not_first() {
        let err = link_files(
            &[
                ("/page.tmpl", "\"intro\"\nextends \"base.tmpl\""),
                ("/base.tmpl", r#""base""#),
            ],
            "/page.tmpl",
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ExtendsNotFirst));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_extends_inside_include_block_is_misplaced() {
        let err = link_files(
            &[
                ("/page.tmpl", r#"include "part.tmpl" { extends "base.tmpl" }"#),
                ("/part.tmpl", "yield"),
                ("/base.tmpl", r#""base""#),
            ],
            "/page.tmpl",
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ExtendsNotFirst));
    }

    #[test]
    fn test_extends_not_first_in_included_file() {
        let err = link_files(
            &[
                ("/page.tmpl", r#"div { include "part.tmpl" }"#),
                ("/part.tmpl", "\"part\"\nextends \"base.tmpl\""),
                ("/base.tmpl", r#""base""#),
            ],
            "/page.tmpl",
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ExtendsNotFirst));
        assert_eq!(err.filename(), Some(Path::new("/part.tmpl")));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_unexpected_nodes_in_extending_root() {
        let err = link_files(
            &[
                ("/page.tmpl", "extends \"base.tmpl\"\n\n\"stray\""),
                ("/base.tmpl", r#""base""#),
            ],
            "/page.tmpl",
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnexpectedNodesInExtendingRoot));
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.filename(), Some(Path::new("/page.tmpl")));
    }

    #[test]
    fn test_unexpected_block() {
        let err = link_files(
            &[
                ("/page.tmpl", "extends \"base.tmpl\"\nblock content { }\nblock sidebar { }"),
                ("/base.tmpl", r#"block content { "c" }"#),
            ],
            "/page.tmpl",
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnexpectedBlock));
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().contains("Unexpected block sidebar"));
    }

    #[test]
    fn test_include_is_expanded_with_yield_content() {
        let linked = link_files(
            &[
                ("/page.tmpl", "include \"card.tmpl\" { \"body\" }\ninclude \"notes.txt\""),
                ("/card.tmpl", r#"div { "top" yield "bottom" }"#),
                ("/notes.txt", "line one\r\nline two"),
            ],
            "/page.tmpl",
        )
        .unwrap();
        assert_eq!(collect_text(&linked.root.nodes), "topbodybottomline one\nline two");
    }

    #[test]
    fn test_included_extends_chain_loses_named_blocks() {
        let linked = link_files(
            &[
                ("/page.tmpl", r#"block outer { include "widget.tmpl" }"#),
                ("/widget.tmpl", r#"extends "frame.tmpl" append slot { "w" }"#),
                ("/frame.tmpl", r#"block slot { "f" }"#),
            ],
            "/page.tmpl",
        )
        .unwrap();
        assert_eq!(
            outline(&linked.root.nodes),
            "block outer (replace)\n  block\n    block\n      text \"f\"\n      text \"w\"\n"
        );
        assert_eq!(linked.declared_blocks.names(), vec!["outer"]);
    }

    #[test]
    fn test_unloaded_extends_is_reported() {
        let file = SourceFile::new(r#"extends "base.tmpl""#, Some("/page.tmpl".into()));
        let err = link(parse_source(&file).unwrap()).unwrap_err();
        assert!(matches!(err, TemplateError::Unloaded { kind: "Extends", .. }));
    }

    #[test]
    fn test_block_ids_are_unique_per_link() {
        let linked = link_files(
            &[
                ("/page.tmpl", r#"extends "base.tmpl" block a { } block b { }"#),
                ("/base.tmpl", r#"block a { } block b { }"#),
            ],
            "/page.tmpl",
        )
        .unwrap();
        let a = linked.declared_blocks.get("a")[0];
        let b = linked.declared_blocks.get("b")[0];
        assert_ne!(a, b);
        let parents_of_a = linked.declared_blocks.parents_of(a).expect("a was merged");
        assert_eq!(parents_of_a.len(), 1);
        assert!(!parents_of_a.contains(&a) && !parents_of_a.contains(&b));
    }
}
