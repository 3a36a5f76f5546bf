use async_trait::async_trait;

use crate::{CommentId, CommentRecord, EditComment, Error, NewComment, PostId, PostWithComments};

/// The remote side of the comment interactions
///
/// Implemented over HTTP for real use, and in-process by the store for tests.
#[async_trait]
pub trait CommentApi {
    async fn create_comment(
        &mut self,
        post: PostId,
        comment: NewComment,
    ) -> Result<CommentRecord, Error>;

    async fn edit_comment(
        &mut self,
        comment: CommentId,
        edit: EditComment,
    ) -> Result<CommentRecord, Error>;

    async fn delete_comment(&mut self, comment: CommentId) -> Result<(), Error>;

    async fn fetch_post_with_comments(&mut self, post: PostId) -> Result<PostWithComments, Error>;
}
