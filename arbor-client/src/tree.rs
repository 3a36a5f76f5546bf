use std::collections::HashMap;

use crate::{
    api::{CommentId, CommentRecord},
    CommentNode,
};

/// The reply tree of one post, as displayed
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommentTree {
    /// Comments attached directly to the post, in creation order
    pub roots: Vec<CommentNode>,
}

impl CommentTree {
    pub fn new() -> CommentTree {
        CommentTree { roots: Vec::new() }
    }

    /// Nests a flat list of comments under their parents
    ///
    /// The input order is kept both for the top level and for each node's replies, so
    /// callers should pass the records sorted by creation date. Every record ends up in
    /// the tree exactly once: a comment whose parent is missing, is itself, or is part of
    /// a parent cycle is shown at the top level instead of being dropped.
    pub fn build(records: Vec<CommentRecord>) -> CommentTree {
        let mut index = HashMap::with_capacity(records.len());
        for (i, r) in records.iter().enumerate() {
            index.entry(r.id).or_insert(i);
        }

        let mut children = vec![Vec::new(); records.len()];
        let mut roots = Vec::new();
        for (i, r) in records.iter().enumerate() {
            match r.parent_id {
                None => roots.push(i),
                Some(parent) => match index.get(&parent) {
                    Some(&p) if p != i => children[p].push(i),
                    _ => {
                        tracing::warn!(
                            comment = ?r.id,
                            ?parent,
                            "parent comment not found, showing comment at top level"
                        );
                        roots.push(i);
                    }
                },
            }
        }

        let mut slots = records
            .into_iter()
            .map(|r| Some(CommentNode::from(r)))
            .collect::<Vec<_>>();
        let mut placed = vec![false; slots.len()];
        let mut res = Vec::with_capacity(roots.len());
        for r in roots {
            assemble(r, &children, &mut slots, &mut placed, &mut res);
        }

        // Anything not reached yet only has ancestors among its own descendants
        for i in 0..placed.len() {
            if placed[i] {
                continue;
            }
            if let Some(node) = &slots[i] {
                tracing::warn!(
                    comment = ?node.id,
                    "comment is part of a parent cycle, showing it at top level"
                );
            }
            assemble(i, &children, &mut slots, &mut placed, &mut res);
        }

        CommentTree { roots: res }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of comments in the tree, nested ones included
    pub fn len(&self) -> usize {
        self.roots.iter().map(|r| r.count()).sum()
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        CommentNode::find_in(&self.roots, id)
    }

    pub fn find_mut(&mut self, id: &CommentId) -> Option<&mut CommentNode> {
        CommentNode::find_in_mut(&mut self.roots, id)
    }

    /// Distance from the top level, which is at depth 0
    pub fn depth_of(&self, id: &CommentId) -> Option<usize> {
        let mut pending = self.roots.iter().rev().map(|n| (n, 0)).collect::<Vec<_>>();
        while let Some((n, depth)) = pending.pop() {
            if n.id == *id {
                return Some(depth);
            }
            pending.extend(n.replies.iter().rev().map(|r| (r, depth + 1)));
        }
        None
    }

    /// Depth-first, pre-order walk over every node with its depth
    pub fn for_each(&self, mut f: impl FnMut(&CommentNode, usize)) {
        let mut pending = self.roots.iter().rev().map(|n| (n, 0)).collect::<Vec<_>>();
        while let Some((n, depth)) = pending.pop() {
            f(n, depth);
            pending.extend(n.replies.iter().rev().map(|r| (r, depth + 1)));
        }
    }
}

/// A node being assembled, with the position of its next child to look at
struct Frame {
    index: usize,
    next_child: usize,
    node: CommentNode,
}

impl Frame {
    fn take(index: usize, slots: &mut [Option<CommentNode>], placed: &mut [bool]) -> Frame {
        placed[index] = true;
        Frame {
            index,
            next_child: 0,
            node: slots[index]
                .take()
                .expect("comment placed twice while building the tree"),
        }
    }
}

/// Moves `root` and its not yet placed descendants out of `slots`, nested, onto `out`
fn assemble(
    root: usize,
    children: &[Vec<usize>],
    slots: &mut [Option<CommentNode>],
    placed: &mut [bool],
    out: &mut Vec<CommentNode>,
) {
    let mut stack = vec![Frame::take(root, slots, placed)];
    while let Some(top) = stack.last_mut() {
        let siblings = &children[top.index];
        let pending = siblings[top.next_child..]
            .iter()
            .position(|&c| !placed[c]);
        match pending {
            Some(offset) => {
                let c = siblings[top.next_child + offset];
                top.next_child += offset + 1;
                stack.push(Frame::take(c, slots, placed));
            }
            None => {
                if let Some(done) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.node.replies.push(done.node),
                        None => out.push(done.node),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{Author, PostId, UserId, Uuid};
    use chrono::{TimeZone, Utc};

    pub fn id(n: u8) -> CommentId {
        CommentId(Uuid::from_bytes([n; 16]))
    }

    pub fn record(n: u8, parent: Option<u8>) -> CommentRecord {
        let created_at = Utc.timestamp_opt(1_600_000_000 + n as i64, 0).unwrap();
        CommentRecord {
            id: id(n),
            content: format!("comment {n}"),
            author: Author {
                id: UserId::stub(),
                name: String::from("author"),
                avatar: None,
            },
            parent_id: parent.map(id),
            post_id: PostId(Uuid::from_bytes([0; 16])),
            image_url: None,
            created_at,
            updated_at: None,
            deleted_at: None,
        }
    }

    /// One reply chain, each comment answering the one before
    pub fn deep_chain(len: u128) -> Vec<CommentRecord> {
        (1..=len)
            .map(|n| {
                let mut r = record(0, None);
                r.id = CommentId(Uuid::from_u128(n));
                r.parent_id = Some(n - 1)
                    .filter(|&p| p > 0)
                    .map(|p| CommentId(Uuid::from_u128(p)));
                r
            })
            .collect()
    }

    fn ids(nodes: &[CommentNode]) -> Vec<CommentId> {
        nodes.iter().map(|n| n.id).collect()
    }

    #[test]
    fn empty() {
        let tree = CommentTree::build(Vec::new());
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn chain() {
        let tree = CommentTree::build(vec![
            record(b'A', None),
            record(b'B', Some(b'A')),
            record(b'C', Some(b'B')),
        ]);
        assert_eq!(ids(&tree.roots), vec![id(b'A')]);
        let a = &tree.roots[0];
        assert_eq!(ids(&a.replies), vec![id(b'B')]);
        let b = &a.replies[0];
        assert_eq!(ids(&b.replies), vec![id(b'C')]);
        assert!(b.replies[0].replies.is_empty());
        assert_eq!(tree.depth_of(&id(b'C')), Some(2));
    }

    #[test]
    fn keeps_input_order() {
        let tree = CommentTree::build(vec![
            record(1, None),
            record(2, Some(1)),
            record(3, None),
            record(4, Some(1)),
            record(5, None),
        ]);
        assert_eq!(ids(&tree.roots), vec![id(1), id(3), id(5)]);
        assert_eq!(ids(&tree.roots[0].replies), vec![id(2), id(4)]);
    }

    #[test]
    fn parent_after_child() {
        let tree = CommentTree::build(vec![record(2, Some(1)), record(1, None)]);
        assert_eq!(ids(&tree.roots), vec![id(1)]);
        assert_eq!(ids(&tree.roots[0].replies), vec![id(2)]);
    }

    #[test]
    fn orphans_become_roots() {
        let tree = CommentTree::build(vec![
            record(1, None),
            record(2, Some(42)),
            record(3, Some(2)),
        ]);
        assert_eq!(ids(&tree.roots), vec![id(1), id(2)]);
        assert_eq!(ids(&tree.roots[1].replies), vec![id(3)]);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn self_parent_becomes_root() {
        let tree = CommentTree::build(vec![record(1, Some(1))]);
        assert_eq!(ids(&tree.roots), vec![id(1)]);
        assert!(tree.roots[0].replies.is_empty());
    }

    #[test]
    fn cycles_are_broken() {
        let tree = CommentTree::build(vec![
            record(1, Some(3)),
            record(2, Some(1)),
            record(3, Some(2)),
            record(4, None),
        ]);
        assert_eq!(tree.len(), 4);
        assert_eq!(ids(&tree.roots), vec![id(4), id(1)]);
        assert_eq!(ids(&tree.roots[1].replies), vec![id(2)]);
        assert_eq!(ids(&tree.roots[1].replies[0].replies), vec![id(3)]);
    }

    #[test]
    fn deep_chain_is_walked_without_recursion() {
        let len = 200_000;
        let tree = CommentTree::build(deep_chain(len));
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.len(), len as usize);

        let last = CommentId(Uuid::from_u128(len));
        assert_eq!(tree.depth_of(&last), Some(len as usize - 1));
        assert!(tree.find(&last).is_some());
        let mut deepest = 0;
        tree.for_each(|_, depth| deepest = std::cmp::max(deepest, depth));
        assert_eq!(deepest, len as usize - 1);

        let mut reversed = deep_chain(len);
        reversed.reverse();
        assert_eq!(CommentTree::build(reversed).len(), len as usize);
    }

    #[test]
    fn never_loses_comments() {
        bolero::check!()
            .with_type::<Vec<(u8, Option<u8>)>>()
            .cloned()
            .for_each(|shape| {
                // small id space, so that parents, duplicates and cycles all happen
                let records = shape
                    .iter()
                    .map(|(n, p)| record(n % 16, p.map(|p| p % 16)))
                    .collect::<Vec<_>>();
                let tree = CommentTree::build(records.clone());
                assert_eq!(tree.len(), records.len());

                let mut seen = Vec::new();
                tree.for_each(|n, _| seen.push(n.id));
                let mut expected = records.iter().map(|r| r.id).collect::<Vec<_>>();
                seen.sort();
                expected.sort();
                assert_eq!(seen, expected);
            });
    }

    #[test]
    fn roots_keep_their_order() {
        bolero::check!()
            .with_type::<Vec<(u8, Option<u8>)>>()
            .cloned()
            .for_each(|shape| {
                let mut records = Vec::<CommentRecord>::new();
                for (n, p) in shape {
                    let r = record(n % 16, p.map(|p| p % 16));
                    if records.iter().all(|prev| prev.id != r.id) {
                        records.push(r);
                    }
                }
                let roots_in_input = records
                    .iter()
                    .filter(|r| r.parent_id.is_none())
                    .map(|r| r.id)
                    .collect::<Vec<_>>();
                let tree = CommentTree::build(records);
                let top = tree
                    .roots
                    .iter()
                    .map(|n| n.id)
                    .filter(|id| roots_in_input.contains(id))
                    .collect::<Vec<_>>();
                assert_eq!(top, roots_in_input);
            });
    }
}
