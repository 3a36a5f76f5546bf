use crate::{Author, PostId, Time};

use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

/// A comment as stored, with its parent as a back-reference
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentRecord {
    pub id: CommentId,
    pub content: String,
    pub author: Author,

    /// None for comments attached directly to the post
    pub parent_id: Option<CommentId>,
    pub post_id: PostId,
    pub image_url: Option<String>,

    pub created_at: Time,
    pub updated_at: Option<Time>,

    /// Set when the comment was deleted; the record stays so its replies keep their parent
    pub deleted_at: Option<Time>,
}

impl CommentRecord {
    pub fn is_edited(&self) -> bool {
        self.updated_at
            .map(|u| u != self.created_at)
            .unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The record as shown to readers once deleted
    pub fn tombstoned(mut self) -> CommentRecord {
        if self.is_deleted() {
            self.content = String::new();
            self.image_url = None;
        }
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub image_url: Option<String>,
}

impl NewComment {
    pub fn new(parent_id: Option<CommentId>, content: String) -> NewComment {
        NewComment {
            parent_id,
            content,
            image_url: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub content: String,
}
