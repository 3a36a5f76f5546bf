use crate::api::{Author, CommentId, CommentRecord, Time};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub id: CommentId,
    pub content: String,
    pub author: Author,
    pub image_url: Option<String>,

    pub created_at: Time,
    pub updated_at: Option<Time>,
    pub deleted_at: Option<Time>,

    /// Child comments, in creation order
    pub replies: Vec<CommentNode>,
}

impl From<CommentRecord> for CommentNode {
    fn from(r: CommentRecord) -> CommentNode {
        CommentNode {
            id: r.id,
            content: r.content,
            author: r.author,
            image_url: r.image_url,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
            replies: Vec::new(),
        }
    }
}

impl CommentNode {
    pub fn is_edited(&self) -> bool {
        self.updated_at
            .map(|u| u != self.created_at)
            .unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_replies(&self) -> bool {
        !self.replies.is_empty()
    }

    /// Number of nodes in this subtree, self included
    pub fn count(&self) -> usize {
        let mut res = 0;
        let mut pending = vec![self];
        while let Some(n) = pending.pop() {
            res += 1;
            pending.extend(n.replies.iter());
        }
        res
    }

    /// First node with this id, in display order
    pub fn find_in<'a>(comments: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
        let mut pending = comments.iter().rev().collect::<Vec<_>>();
        while let Some(c) = pending.pop() {
            if c.id == *id {
                return Some(c);
            }
            pending.extend(c.replies.iter().rev());
        }
        None
    }

    pub fn find_in_mut<'a>(
        comments: &'a mut [CommentNode],
        id: &CommentId,
    ) -> Option<&'a mut CommentNode> {
        let mut pending = comments.iter_mut().rev().collect::<Vec<_>>();
        while let Some(c) = pending.pop() {
            if c.id == *id {
                return Some(c);
            }
            pending.extend(c.replies.iter_mut().rev());
        }
        None
    }
}

// The derived drop glue recurses once per level, which a long reply chain overflows
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut n) = pending.pop() {
            pending.append(&mut n.replies);
        }
    }
}
