//! Declared block registry and the merge of a child document into its parent

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use crate::parser::ast::{Block, BlockId, BlockMode, Node};
use crate::walk::{walk, walk_nodes, Hooks, Visit, Visitor, WalkOptions};

/// Replace-mode named blocks of a linked document, by name in declaration order,
/// plus the ancestor blocks each merged block was applied to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclaredBlocks {
    blocks: HashMap<String, Vec<BlockId>>,
    parents: HashMap<BlockId, Vec<BlockId>>,
}

impl DeclaredBlocks {
    pub fn get(&self, name: &str) -> &[BlockId] {
        self.blocks.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    /// Declared names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Ancestor blocks recorded for `id` by a merge
    pub fn parents_of(&self, id: BlockId) -> Option<&[BlockId]> {
        self.parents.get(&id).map(Vec::as_slice)
    }

    fn register(&mut self, name: &str, id: BlockId) {
        let ids = self.blocks.entry(name.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Expand `ids` with their recorded ancestors, ancestor-first.
    ///
    /// Each block appears once even when several lineages share it.
    pub fn flatten(&self, ids: &[BlockId]) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.flatten_into(ids, &mut out, &mut seen);
        out
    }

    fn flatten_into(&self, ids: &[BlockId], out: &mut Vec<BlockId>, seen: &mut HashSet<BlockId>) {
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(parents) = self.parents.get(&id) {
                self.flatten_into(parents, out, seen);
            }
            out.push(id);
        }
    }

    /// Let the child's declarations shadow ours for further ancestors
    pub(crate) fn overlay(&mut self, child: DeclaredBlocks) {
        self.blocks.extend(child.blocks);
        self.parents.extend(child.parents);
    }
}

/// Give every named block an id and register the replace-mode ones
pub(crate) fn declare_blocks(root: &mut Block, next_id: &mut u32) -> DeclaredBlocks {
    let mut declared = DeclaredBlocks::default();
    let mut hooks = Hooks::pre(|node: &mut Node| {
        if let Node::NamedBlock(block) = node {
            let id = *block.id.get_or_insert_with(|| {
                *next_id += 1;
                BlockId(*next_id)
            });
            if block.mode == BlockMode::Replace {
                declared.register(&block.name, id);
            }
        }
        Ok::<_, Infallible>(Visit::Continue)
    });
    if let Err(never) = walk_nodes(&mut root.nodes, &mut hooks, WalkOptions::default()) {
        match never {}
    }
    declared
}

/// Names of the named blocks present anywhere in `root`
pub(crate) fn block_names(root: &mut Block) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut hooks = Hooks::pre(|node: &mut Node| {
        if let Node::NamedBlock(block) = node {
            names.insert(block.name.clone());
        }
        Ok::<_, Infallible>(Visit::Continue)
    });
    if let Err(never) = walk_nodes(&mut root.nodes, &mut hooks, WalkOptions::default()) {
        match never {}
    }
    names
}

/// Block names currently being merged
#[derive(Debug, Default)]
struct MergeContext {
    active: HashSet<String>,
    /// One frame per entered named block; `None` for ignored occurrences
    frames: Vec<Option<Vec<BlockId>>>,
}

impl MergeContext {
    fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    fn start(&mut self, name: &str, targets: Vec<BlockId>) {
        self.active.insert(name.to_string());
        self.frames.push(Some(targets));
    }

    fn ignore(&mut self) {
        self.frames.push(None);
    }

    /// Leave the innermost block, returning its targets unless it was ignored
    fn done(&mut self, name: &str) -> Option<Vec<BlockId>> {
        let targets = self.frames.pop().flatten()?;
        self.active.remove(name);
        Some(targets)
    }
}

struct Merge<'a> {
    parent_root: &'a mut Block,
    parent_blocks: &'a DeclaredBlocks,
    lineage: &'a mut DeclaredBlocks,
    ctx: MergeContext,
}

impl Visitor for Merge<'_> {
    type Error = Infallible;

    fn before(&mut self, node: &mut Node) -> Result<Visit, Infallible> {
        let Node::NamedBlock(block) = node else {
            return Ok(Visit::Continue);
        };
        if self.ctx.is_active(&block.name) {
            block.ignore = true;
            self.ctx.ignore();
            return Ok(Visit::Continue);
        }

        let targets = self.parent_blocks.flatten(self.parent_blocks.get(&block.name));
        if !targets.is_empty() {
            block.parents = Some(targets.clone());
            if let Some(id) = block.id {
                self.lineage.parents.insert(id, targets.clone());
            }
        }
        self.ctx.start(&block.name, targets);
        Ok(Visit::Continue)
    }

    fn after(&mut self, node: &mut Node) -> Result<Visit, Infallible> {
        if let Node::NamedBlock(block) = node {
            if let Some(targets) = self.ctx.done(&block.name) {
                if !targets.is_empty() {
                    rewrite_targets(self.parent_root, &targets, block.mode, &block.nodes);
                }
            }
        }
        Ok(Visit::Continue)
    }
}

/// Apply every named block of `child` to the matching blocks of the parent.
///
/// Lineage recorded on the child's blocks is added to `child_blocks`.
pub(crate) fn merge(
    parent_root: &mut Block,
    parent_blocks: &DeclaredBlocks,
    child: &mut Block,
    child_blocks: &mut DeclaredBlocks,
) {
    let mut merge = Merge {
        parent_root,
        parent_blocks,
        lineage: child_blocks,
        ctx: MergeContext::default(),
    };
    let mut root = Node::Block(std::mem::take(child));
    if let Err(never) = walk(&mut root, &mut merge, WalkOptions::default()) {
        match never {}
    }
    if let Node::Block(block) = root {
        *child = block;
    }
}

/// Rewrite the content of every block in `root` whose id is a target
fn rewrite_targets(root: &mut Block, targets: &[BlockId], mode: BlockMode, content: &[Node]) {
    let targets: HashSet<BlockId> = targets.iter().copied().collect();
    let mut hooks = Hooks::post(|node: &mut Node| {
        if let Node::NamedBlock(block) = node {
            if block.id.is_some_and(|id| targets.contains(&id)) {
                match mode {
                    BlockMode::Append => block.nodes.extend(content.iter().cloned()),
                    BlockMode::Prepend => {
                        let tail = std::mem::take(&mut block.nodes);
                        block.nodes = content.iter().cloned().chain(tail).collect();
                    }
                    BlockMode::Replace => block.nodes = content.to_vec(),
                }
            }
        }
        Ok::<_, Infallible>(Visit::Continue)
    });
    if let Err(never) = walk_nodes(&mut root.nodes, &mut hooks, WalkOptions::default()) {
        match never {}
    }
}
