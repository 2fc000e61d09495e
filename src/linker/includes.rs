//! Include expansion and yield placement

use std::convert::Infallible;

use tracing::warn;

use super::LinkSession;
use crate::error::TemplateError;
use crate::parser::ast::{Block, Node, Text};
use crate::walk::{walk_nodes, Hooks, Visit, Visitor, WalkOptions};

struct IncludeExpander<'s> {
    session: &'s mut LinkSession,
}

impl Visitor for IncludeExpander<'_> {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node) -> Result<Visit, TemplateError> {
        let Node::RawInclude(raw) = node else {
            return Ok(Visit::Continue);
        };
        let text = raw.file.text.as_deref().ok_or_else(|| TemplateError::Unloaded {
            kind: "RawInclude",
            path: raw.file.path.clone(),
            position: raw.position.clone(),
        })?;
        Ok(Visit::Replace(Node::Text(Text::new(
            text.replace('\r', ""),
            raw.position.clone(),
        ))))
    }

    fn after(&mut self, node: &mut Node) -> Result<Visit, TemplateError> {
        let Node::Include(include) = node else {
            return Ok(Visit::Continue);
        };
        let ast = include.file.ast.take().ok_or_else(|| TemplateError::Unloaded {
            kind: "Include",
            path: include.file.path.clone(),
            position: include.position.clone(),
        })?;
        let mut linked = self.session.link_node(*ast)?;
        if linked.has_extends {
            remove_blocks(&mut linked.root);
        }
        apply_yield(&mut linked.root, include.block.take());
        Ok(Visit::Replace(Node::Block(linked.root)))
    }
}

/// Replace every include in `root` with its linked document
pub(crate) fn apply_includes(root: &mut Block, session: &mut LinkSession) -> Result<(), TemplateError> {
    walk_nodes(&mut root.nodes, &mut IncludeExpander { session }, WalkOptions::default())
}

/// Turn named blocks into plain blocks; they can no longer be overridden
pub(crate) fn remove_blocks(root: &mut Block) {
    let mut hooks = Hooks::pre(|node: &mut Node| {
        if let Node::NamedBlock(named) = node {
            let block = Block::new(std::mem::take(&mut named.nodes), named.position.clone());
            *node = Node::Block(block);
        }
        Ok::<_, Infallible>(Visit::Continue)
    });
    if let Err(never) = walk_nodes(&mut root.nodes, &mut hooks, WalkOptions::default()) {
        match never {}
    }
}

/// Splice the include site's content into the included document
pub(crate) fn apply_yield(root: &mut Block, content: Option<Block>) {
    let Some(content) = content.filter(|block| !block.nodes.is_empty()) else {
        return;
    };

    let mut replaced = false;
    let mut hooks = Hooks::post(|node: &mut Node| {
        if let Node::YieldBlock(point) = node {
            let position = point.position.clone();
            *node = Node::Block(Block::new(vec![Node::Block(content.clone())], position));
            replaced = true;
        }
        Ok::<_, Infallible>(Visit::Continue)
    });
    if let Err(never) = walk_nodes(&mut root.nodes, &mut hooks, WalkOptions::default()) {
        match never {}
    }

    if !replaced {
        warn!(
            at = %content.position,
            "included template has no yield, appending block content at the default location"
        );
        push_at_default_yield(root, content);
    }
}

/// Append `content` to the last non-text-only container, descending as deep as possible
fn push_at_default_yield(block: &mut Block, content: Block) {
    let target = block.nodes.iter().rposition(accepts_default_yield);
    match target.and_then(|index| yield_container(&mut block.nodes[index])) {
        Some(inner) => push_at_default_yield(inner, content),
        None => block.nodes.push(Node::Block(content)),
    }
}

fn accepts_default_yield(node: &Node) -> bool {
    if node.is_text_only() {
        return false;
    }
    matches!(node, Node::Block(_)) || node.nested_block().is_some_and(|block| !block.nodes.is_empty())
}

fn yield_container(node: &mut Node) -> Option<&mut Block> {
    match node {
        Node::Block(block) => Some(block),
        other => other.nested_block_mut(),
    }
}
