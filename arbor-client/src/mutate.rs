//! Local edits applied to an already-built tree, so that the view follows the user's
//! actions without refetching the whole post.
//!
//! None of these fail: a target that is not in the tree makes the edit a no-op, which the
//! return value reports. The next full reload brings the tree back in line with the server.

use crate::{
    api::{CommentId, CommentRecord, Time},
    CommentNode, CommentTree,
};

impl CommentTree {
    /// Removes every node with this id, along with all of its replies
    ///
    /// Returns the number of nodes that matched `id`.
    pub fn remove_node(&mut self, id: &CommentId) -> usize {
        let mut removed = 0;
        let mut pending = vec![&mut self.roots];
        while let Some(nodes) = pending.pop() {
            let before = nodes.len();
            nodes.retain(|n| n.id != *id);
            removed += before - nodes.len();
            pending.extend(nodes.iter_mut().map(|n| &mut n.replies));
        }
        removed
    }

    /// Appends `node` at the top level, or as the last reply of `parent`
    ///
    /// Returns false, leaving the tree untouched, if `parent` is not in the tree.
    pub fn insert_reply(&mut self, parent: Option<&CommentId>, node: CommentNode) -> bool {
        match parent {
            None => {
                self.roots.push(node);
                true
            }
            Some(parent) => match self.find_mut(parent) {
                Some(p) => {
                    p.replies.push(node);
                    true
                }
                None => {
                    tracing::debug!(?parent, reply = ?node.id, "reply parent is not displayed");
                    false
                }
            },
        }
    }

    /// Replaces the displayed content of a comment
    pub fn mark_edited(&mut self, id: &CommentId, content: String) -> bool {
        match self.find_mut(id) {
            Some(node) => {
                node.content = content;
                true
            }
            None => false,
        }
    }

    /// Shows a comment as deleted while keeping its replies in place
    pub fn tombstone(&mut self, id: &CommentId, at: Time) -> bool {
        match self.find_mut(id) {
            Some(node) => {
                node.content.clear();
                node.image_url = None;
                node.deleted_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Copies the server-side timestamps of `record` onto its node
    pub fn refresh_timestamps(&mut self, record: &CommentRecord) -> bool {
        match self.find_mut(&record.id) {
            Some(node) => {
                node.created_at = record.created_at;
                node.updated_at = record.updated_at;
                node.deleted_at = record.deleted_at;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        api::Uuid,
        tree::tests::{deep_chain, id, record},
    };

    fn sample() -> CommentTree {
        CommentTree::build(vec![
            record(1, None),
            record(2, Some(1)),
            record(3, Some(2)),
            record(4, None),
            record(5, Some(4)),
        ])
    }

    #[test]
    fn remove_takes_the_subtree() {
        let mut tree = sample();
        assert_eq!(tree.remove_node(&id(2)), 1);
        assert_eq!(tree.len(), 3);
        assert!(tree.find(&id(3)).is_none());
        assert!(tree.find(&id(1)).is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut tree = sample();
        tree.remove_node(&id(5));
        let after_first = tree.clone();
        assert_eq!(tree.remove_node(&id(5)), 0);
        assert_eq!(tree, after_first);
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut tree = sample();
        assert_eq!(tree.remove_node(&id(99)), 0);
        assert_eq!(tree, sample());
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let mut tree = sample();
        let node = CommentNode::from(record(9, None));
        assert!(tree.insert_reply(None, node));
        assert_eq!(tree.roots.last().map(|n| n.id), Some(id(9)));
        tree.remove_node(&id(9));
        assert_eq!(tree, sample());

        let node = CommentNode::from(record(9, Some(3)));
        assert!(tree.insert_reply(Some(&id(3)), node));
        assert_eq!(tree.depth_of(&id(9)), Some(3));
        tree.remove_node(&id(9));
        assert_eq!(tree, sample());
    }

    #[test]
    fn insert_under_missing_parent_is_noop() {
        let mut tree = sample();
        let node = CommentNode::from(record(9, Some(42)));
        assert!(!tree.insert_reply(Some(&id(42)), node));
        assert_eq!(tree, sample());
    }

    #[test]
    fn edit_and_tombstone() {
        let mut tree = sample();
        assert!(tree.mark_edited(&id(3), String::from("new text")));
        assert_eq!(tree.find(&id(3)).unwrap().content, "new text");
        assert!(!tree.mark_edited(&id(42), String::from("nope")));

        let now = Utc::now();
        assert!(tree.tombstone(&id(2), now));
        let two = tree.find(&id(2)).unwrap();
        assert!(two.is_deleted());
        assert!(two.content.is_empty());
        assert_eq!(two.replies.len(), 1);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn refresh_marks_edited() {
        let mut tree = sample();
        let mut r = record(5, Some(4));
        r.updated_at = Some(r.created_at + Duration::seconds(30));
        assert!(!tree.find(&id(5)).unwrap().is_edited());
        assert!(tree.refresh_timestamps(&r));
        assert!(tree.find(&id(5)).unwrap().is_edited());
    }

    #[test]
    fn deep_chain_edits() {
        let mut tree = CommentTree::build(deep_chain(200_000));
        let last = CommentId(Uuid::from_u128(200_000));
        assert!(tree.mark_edited(&last, String::from("the end")));
        assert!(tree.insert_reply(Some(&last), CommentNode::from(record(1, None))));
        assert_eq!(tree.depth_of(&id(1)), Some(200_000));

        assert_eq!(tree.remove_node(&CommentId(Uuid::from_u128(2))), 1);
        assert_eq!(tree.len(), 1);
        drop(tree);
    }
}
