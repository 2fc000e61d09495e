//! Generic pre/post-order traversal shared by every pass

use crate::parser::ast::{Block, Node};

/// What the walker does after a visitor hook returns
#[derive(Debug, Clone, PartialEq)]
pub enum Visit {
    Continue,
    /// Skip the children and the `after` hook. Treated as `Continue` from `after`.
    Skip,
    /// Install a replacement. From `before` the replacement's children are
    /// not visited, but `after` still runs on it.
    Replace(Node),
    /// Drop the node from its parent sequence
    Remove,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Descend into the loaded documents of `Extends`, `Include` and `RawInclude`
    pub include_dependencies: bool,
}

impl WalkOptions {
    pub fn with_dependencies() -> Self {
        Self {
            include_dependencies: true,
        }
    }
}

pub trait Visitor {
    type Error;

    fn before(&mut self, _node: &mut Node) -> Result<Visit, Self::Error> {
        Ok(Visit::Continue)
    }

    fn after(&mut self, _node: &mut Node) -> Result<Visit, Self::Error> {
        Ok(Visit::Continue)
    }
}

/// A visitor built from a pair of closures
pub struct Hooks<B, A> {
    pub before: B,
    pub after: A,
}

type NoHook<E> = fn(&mut Node) -> Result<Visit, E>;

impl<B, E> Hooks<B, NoHook<E>>
where
    B: FnMut(&mut Node) -> Result<Visit, E>,
{
    pub fn pre(before: B) -> Self {
        Hooks {
            before,
            after: |_| Ok(Visit::Continue),
        }
    }
}

impl<A, E> Hooks<NoHook<E>, A>
where
    A: FnMut(&mut Node) -> Result<Visit, E>,
{
    pub fn post(after: A) -> Self {
        Hooks {
            before: |_| Ok(Visit::Continue),
            after,
        }
    }
}

impl<B, A, E> Visitor for Hooks<B, A>
where
    B: FnMut(&mut Node) -> Result<Visit, E>,
    A: FnMut(&mut Node) -> Result<Visit, E>,
{
    type Error = E;

    fn before(&mut self, node: &mut Node) -> Result<Visit, E> {
        (self.before)(node)
    }

    fn after(&mut self, node: &mut Node) -> Result<Visit, E> {
        (self.after)(node)
    }
}

/// Walk a tree rooted at `node`.
///
/// A removed root is left behind as an empty block at the same position.
pub fn walk<V: Visitor>(node: &mut Node, visitor: &mut V, options: WalkOptions) -> Result<(), V::Error> {
    if !walk_node(node, visitor, options)? {
        *node = Node::Block(Block::new(Vec::new(), node.position().clone()));
    }
    Ok(())
}

/// Walk each node of a sequence without visiting its container
pub fn walk_nodes<V: Visitor>(
    nodes: &mut Vec<Node>,
    visitor: &mut V,
    options: WalkOptions,
) -> Result<(), V::Error> {
    let mut index = 0;
    while index < nodes.len() {
        if walk_node(&mut nodes[index], visitor, options)? {
            index += 1;
        } else {
            nodes.remove(index);
        }
    }
    Ok(())
}

/// Returns `false` when the node must be removed from its parent
fn walk_node<V: Visitor>(node: &mut Node, visitor: &mut V, options: WalkOptions) -> Result<bool, V::Error> {
    match visitor.before(node)? {
        Visit::Continue => walk_children(node, visitor, options)?,
        Visit::Skip => return Ok(true),
        Visit::Replace(replacement) => *node = replacement,
        Visit::Remove => return Ok(false),
    }

    match visitor.after(node)? {
        Visit::Continue | Visit::Skip => Ok(true),
        Visit::Replace(replacement) => {
            *node = replacement;
            Ok(true)
        }
        Visit::Remove => Ok(false),
    }
}

fn walk_children<V: Visitor>(node: &mut Node, visitor: &mut V, options: WalkOptions) -> Result<(), V::Error> {
    match node {
        Node::Block(block) => walk_nodes(&mut block.nodes, visitor, options),
        Node::NamedBlock(block) => walk_nodes(&mut block.nodes, visitor, options),
        Node::Mixin(mixin) => match &mut mixin.block {
            Some(block) => walk_nodes(&mut block.nodes, visitor, options),
            None => Ok(()),
        },
        Node::Filter(filter) => walk_nodes(&mut filter.block.nodes, visitor, options),
        Node::Tag(tag) => walk_nodes(&mut tag.block.nodes, visitor, options),
        Node::Include(include) => {
            if options.include_dependencies {
                if let Some(ast) = &mut include.file.ast {
                    walk(ast, visitor, options)?;
                }
            }
            match &mut include.block {
                Some(block) => walk_nodes(&mut block.nodes, visitor, options),
                None => Ok(()),
            }
        }
        Node::Extends(extends) => match &mut extends.file.ast {
            Some(ast) if options.include_dependencies => walk(ast, visitor, options),
            _ => Ok(()),
        },
        Node::RawInclude(raw) => match &mut raw.file.ast {
            Some(ast) if options.include_dependencies => walk(ast, visitor, options),
            _ => Ok(()),
        },
        Node::YieldBlock(_) | Node::Text(_) => Ok(()),
    }
}
