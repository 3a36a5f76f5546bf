use crate::{Author, CommentRecord, Time, UserId};

use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ForestId(pub Uuid);

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Visibility {
    Public,

    /// Only the owner and the owner's friends can see the forest's posts
    Private,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Forest {
    pub id: ForestId,
    pub owner: UserId,
    pub name: String,
    pub visibility: Visibility,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewForest {
    pub name: String,
    pub visibility: Visibility,
}

/// A "tree": the post that comments hang off
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub author: Author,
    pub content: String,
    pub forest: Option<ForestId>,
    pub created_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub content: String,
    pub forest: Option<ForestId>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PostWithComments {
    pub post: Post,

    /// Flat, ascending by creation date
    pub comments: Vec<CommentRecord>,
}
