use std::{
    cmp,
    collections::{HashMap, HashSet},
};

use crate::{api::CommentId, CommentNode, CommentTree};

/// Replies nested deeper than this are drawn at this indentation level
pub const MAX_DISPLAY_INDENT: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Collapse {
    Expanded,
    Collapsed,
}

impl Collapse {
    /// Top-level comments start expanded, replies start collapsed
    pub fn default_at(depth: usize) -> Collapse {
        match depth {
            0 => Collapse::Expanded,
            _ => Collapse::Collapsed,
        }
    }

    fn flipped(self) -> Collapse {
        match self {
            Collapse::Expanded => Collapse::Collapsed,
            Collapse::Collapsed => Collapse::Expanded,
        }
    }
}

/// Per-comment UI state, never persisted
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeView {
    pub collapse: Collapse,
    pub depth: usize,
    pub editing: bool,
    pub replying: bool,
}

impl NodeView {
    pub fn new(depth: usize) -> NodeView {
        NodeView {
            collapse: Collapse::default_at(depth),
            depth,
            editing: false,
            replying: false,
        }
    }

    pub fn indent(&self) -> usize {
        cmp::min(self.depth, MAX_DISPLAY_INDENT)
    }
}

/// One line of the rendered tree
#[derive(Clone, Debug)]
pub struct VisibleComment<'a> {
    pub node: &'a CommentNode,
    pub depth: usize,
    pub indent: usize,
    pub collapse: Collapse,

    /// Number of direct replies not drawn because this comment is collapsed
    pub hidden_replies: usize,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PresentationState {
    nodes: HashMap<CommentId, NodeView>,
}

impl PresentationState {
    /// Fresh state for a freshly built tree: everything at its default
    pub fn new(tree: &CommentTree) -> PresentationState {
        let mut nodes = HashMap::with_capacity(tree.len());
        tree.for_each(|n, depth| {
            nodes.entry(n.id).or_insert_with(|| NodeView::new(depth));
        });
        PresentationState { nodes }
    }

    pub fn get(&self, id: &CommentId) -> Option<&NodeView> {
        self.nodes.get(id)
    }

    pub fn collapse(&self, id: &CommentId) -> Option<Collapse> {
        self.nodes.get(id).map(|v| v.collapse)
    }

    pub fn is_expanded(&self, id: &CommentId) -> bool {
        self.collapse(id) == Some(Collapse::Expanded)
    }

    /// Starts tracking a comment that was added after the tree was built
    ///
    /// Existing state for `id` is left alone.
    pub fn register(&mut self, id: CommentId, depth: usize) {
        self.nodes.entry(id).or_insert_with(|| NodeView::new(depth));
    }

    /// Flips a comment between expanded and collapsed
    ///
    /// Only comments with replies can be toggled; for others this returns None. The
    /// stored state of descendants is not touched.
    pub fn toggle(&mut self, tree: &CommentTree, id: &CommentId) -> Option<Collapse> {
        let node = tree.find(id)?;
        if !node.has_replies() {
            return None;
        }
        let view = self.entry(tree, id);
        view.collapse = view.collapse.flipped();
        Some(view.collapse)
    }

    /// Expands a comment, returning whether it was collapsed before
    pub fn expand(&mut self, tree: &CommentTree, id: &CommentId) -> bool {
        if tree.find(id).is_none() {
            return false;
        }
        let view = self.entry(tree, id);
        let was_collapsed = view.collapse == Collapse::Collapsed;
        view.collapse = Collapse::Expanded;
        was_collapsed
    }

    pub fn set_editing(&mut self, tree: &CommentTree, id: &CommentId, editing: bool) {
        if tree.find(id).is_some() {
            self.entry(tree, id).editing = editing;
        }
    }

    pub fn set_replying(&mut self, tree: &CommentTree, id: &CommentId, replying: bool) {
        if tree.find(id).is_some() {
            self.entry(tree, id).replying = replying;
        }
    }

    /// Expands every comment of the tree
    pub fn expand_all(&mut self, tree: &CommentTree) {
        let nodes = &mut self.nodes;
        tree.for_each(|n, depth| {
            nodes
                .entry(n.id)
                .or_insert_with(|| NodeView::new(depth))
                .collapse = Collapse::Expanded;
        });
    }

    /// Drops the state of comments that are no longer in the tree
    pub fn retain_present(&mut self, tree: &CommentTree) {
        let mut present = HashSet::with_capacity(self.nodes.len());
        tree.for_each(|n, _| {
            present.insert(n.id);
        });
        self.nodes.retain(|id, _| present.contains(id));
    }

    /// The comments to draw, in display order
    ///
    /// Top-level comments are always drawn; replies are drawn only if their parent is
    /// drawn and expanded.
    pub fn visible<'a>(&self, tree: &'a CommentTree) -> Vec<VisibleComment<'a>> {
        let mut res = Vec::new();
        let mut pending = tree.roots.iter().rev().map(|n| (n, 0)).collect::<Vec<_>>();
        while let Some((n, depth)) = pending.pop() {
            let collapse = self
                .collapse(&n.id)
                .unwrap_or_else(|| Collapse::default_at(depth));
            let expanded = collapse == Collapse::Expanded;
            res.push(VisibleComment {
                node: n,
                depth,
                indent: cmp::min(depth, MAX_DISPLAY_INDENT),
                collapse,
                hidden_replies: if expanded { 0 } else { n.replies.len() },
            });
            if expanded {
                pending.extend(n.replies.iter().rev().map(|r| (r, depth + 1)));
            }
        }
        res
    }

    fn entry(&mut self, tree: &CommentTree, id: &CommentId) -> &mut NodeView {
        self.nodes
            .entry(*id)
            .or_insert_with(|| NodeView::new(tree.depth_of(id).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::Uuid,
        tree::tests::{deep_chain, id, record},
    };

    fn chain() -> CommentTree {
        CommentTree::build(vec![
            record(1, None),
            record(2, Some(1)),
            record(3, Some(2)),
            record(4, Some(3)),
        ])
    }

    fn drawn(view: &PresentationState, tree: &CommentTree) -> Vec<CommentId> {
        view.visible(tree).iter().map(|v| v.node.id).collect()
    }

    #[test]
    fn defaults_by_depth() {
        let tree = chain();
        let view = PresentationState::new(&tree);
        assert_eq!(view.collapse(&id(1)), Some(Collapse::Expanded));
        assert_eq!(view.collapse(&id(2)), Some(Collapse::Collapsed));
        assert_eq!(view.collapse(&id(3)), Some(Collapse::Collapsed));
        assert_eq!(view.get(&id(3)).map(|v| v.depth), Some(2));
        // root expanded shows the child, child collapsed hides the grandchild
        assert_eq!(drawn(&view, &tree), vec![id(1), id(2)]);
    }

    #[test]
    fn toggle_leaves_descendants_alone() {
        let tree = chain();
        let mut view = PresentationState::new(&tree);
        assert_eq!(view.toggle(&tree, &id(2)), Some(Collapse::Expanded));
        assert_eq!(view.collapse(&id(3)), Some(Collapse::Collapsed));
        assert_eq!(drawn(&view, &tree), vec![id(1), id(2), id(3)]);

        assert_eq!(view.toggle(&tree, &id(3)), Some(Collapse::Expanded));
        assert_eq!(drawn(&view, &tree), vec![id(1), id(2), id(3), id(4)]);

        // collapsing an ancestor hides everything below, but remembers the rest
        assert_eq!(view.toggle(&tree, &id(1)), Some(Collapse::Collapsed));
        assert_eq!(drawn(&view, &tree), vec![id(1)]);
        assert_eq!(view.toggle(&tree, &id(1)), Some(Collapse::Expanded));
        assert_eq!(drawn(&view, &tree), vec![id(1), id(2), id(3), id(4)]);
    }

    #[test]
    fn leaves_do_not_toggle() {
        let tree = chain();
        let mut view = PresentationState::new(&tree);
        assert_eq!(view.toggle(&tree, &id(4)), None);
        assert_eq!(view.toggle(&tree, &id(42)), None);
        assert_eq!(view.collapse(&id(4)), Some(Collapse::Collapsed));
    }

    #[test]
    fn indent_is_capped() {
        let mut records = vec![record(0, None)];
        for n in 1..8 {
            records.push(record(n, Some(n - 1)));
        }
        let tree = CommentTree::build(records);
        let mut view = PresentationState::new(&tree);
        for n in 0..8 {
            view.expand(&tree, &id(n));
        }
        let lines = view.visible(&tree);
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[7].depth, 7);
        assert_eq!(lines[7].indent, MAX_DISPLAY_INDENT);
        assert_eq!(lines[3].indent, 3);
        assert_eq!(view.get(&id(6)).map(|v| v.indent()), Some(MAX_DISPLAY_INDENT));
    }

    #[test]
    fn hidden_reply_count() {
        let tree = CommentTree::build(vec![
            record(1, None),
            record(2, Some(1)),
            record(3, Some(2)),
            record(4, Some(2)),
        ]);
        let view = PresentationState::new(&tree);
        let lines = view.visible(&tree);
        assert_eq!(lines[0].hidden_replies, 0);
        assert_eq!(lines[1].hidden_replies, 2);
    }

    #[test]
    fn registered_reply_starts_collapsed() {
        let mut tree = chain();
        let mut view = PresentationState::new(&tree);
        tree.insert_reply(Some(&id(1)), record(9, Some(1)).into());
        view.register(id(9), 1);
        assert_eq!(view.collapse(&id(9)), Some(Collapse::Collapsed));
        view.register(id(1), 0);
        view.toggle(&tree, &id(1));
        view.register(id(1), 0);
        assert_eq!(view.collapse(&id(1)), Some(Collapse::Collapsed));
    }

    #[test]
    fn deep_chain_renders() {
        let mut tree = CommentTree::build(deep_chain(200_000));
        let mut view = PresentationState::new(&tree);
        assert_eq!(view.visible(&tree).len(), 2);

        view.expand_all(&tree);
        let lines = view.visible(&tree);
        assert_eq!(lines.len(), 200_000);
        assert_eq!(lines[199_999].depth, 199_999);
        assert_eq!(lines[199_999].indent, MAX_DISPLAY_INDENT);
        drop(lines);

        tree.remove_node(&CommentId(Uuid::from_u128(3)));
        view.retain_present(&tree);
        assert!(view.get(&CommentId(Uuid::from_u128(2))).is_some());
        assert_eq!(view.get(&CommentId(Uuid::from_u128(3))), None);
        assert_eq!(view.get(&CommentId(Uuid::from_u128(200_000))), None);
    }
}
