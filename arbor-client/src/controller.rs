use std::{collections::HashMap, future::Future, time::Duration};

use chrono::Utc;

use crate::{
    api::{
        CommentApi, CommentId, EditComment, Error, NewComment, Post, PostId, PostWithComments,
        UserId,
    },
    view::{Collapse, VisibleComment},
    CommentNode, CommentTree, PresentationState,
};

/// What a successful delete does to the local tree
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeletePolicy {
    /// Hide the comment and all its replies until the next reload
    RemoveSubtree,

    /// Show the comment as deleted, like the server does, keeping its replies
    Tombstone,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Upper bound on each call to the server
    pub request_timeout: Duration,
    pub delete_policy: DeletePolicy,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            request_timeout: Duration::from_secs(30),
            delete_policy: DeletePolicy::RemoveSubtree,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("Comment content cannot be empty")]
    EmptyContent,

    #[error("Register or log in to take part in the discussion")]
    RegistrationRequired,

    #[error("Only the author of a comment can edit it")]
    NotAuthor,

    #[error("Comment {0:?} is not displayed")]
    UnknownComment(CommentId),

    #[error("The server did not answer in time")]
    TimedOut,

    #[error(transparent)]
    Api(#[from] Error),
}

impl ActionError {
    /// Message shown next to the control that triggered the action
    pub fn user_message(&self) -> String {
        match self {
            ActionError::TimedOut => {
                String::from("The server did not answer in time, please try again")
            }
            ActionError::Api(Error::Unauthenticated) => {
                ActionError::RegistrationRequired.to_string()
            }
            ActionError::Api(Error::PermissionDenied) => {
                String::from("You are not allowed to do this")
            }
            ActionError::Api(
                Error::CommentNotFound(_) | Error::PostNotFound(_) | Error::ParentNotInPost { .. },
            ) => String::from("This comment no longer exists, reload the page to see the latest version"),
            ActionError::Api(e @ Error::RateLimited { .. }) => e.to_string(),
            ActionError::Api(Error::Unknown(_)) => {
                String::from("Something went wrong, please try again")
            }
            e => e.to_string(),
        }
    }

    /// Whether sending the same action again may work
    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::TimedOut => true,
            ActionError::Api(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Drives the user's reply, edit and delete actions on one post's comments
///
/// Owns the displayed tree and its presentation state. Every call to the server is
/// bounded by the configured timeout; failures are recorded as `last_error` and leave
/// both the tree and the user's typed text untouched.
pub struct InteractionController<A> {
    api: A,
    config: ControllerConfig,
    actor: Option<UserId>,
    post: Post,
    tree: CommentTree,
    view: PresentationState,

    /// Text typed in the reply box of each comment, None being the post itself
    reply_drafts: HashMap<Option<CommentId>, String>,
    edit_drafts: HashMap<CommentId, String>,
    last_error: Option<String>,
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(ActionError::Api),
        Err(_) => Err(ActionError::TimedOut),
    }
}

impl<A: CommentApi> InteractionController<A> {
    /// Fetches the post and builds its tree; `actor` is None for anonymous readers
    pub async fn load(
        mut api: A,
        post: PostId,
        actor: Option<UserId>,
        config: ControllerConfig,
    ) -> Result<InteractionController<A>, ActionError> {
        let PostWithComments { post, comments } =
            bounded(config.request_timeout, api.fetch_post_with_comments(post)).await?;
        let tree = CommentTree::build(comments);
        let view = PresentationState::new(&tree);
        tracing::debug!(post = ?post.id, comments = tree.len(), "loaded post");
        Ok(InteractionController {
            api,
            config,
            actor,
            post,
            tree,
            view,
            reply_drafts: HashMap::new(),
            edit_drafts: HashMap::new(),
            last_error: None,
        })
    }

    /// Refetches everything, discarding local edits and presentation state
    pub async fn reload(&mut self) -> Result<(), ActionError> {
        let res = bounded(
            self.config.request_timeout,
            self.api.fetch_post_with_comments(self.post.id),
        )
        .await;
        let PostWithComments { post, comments } = self.record(res)?;
        self.post = post;
        self.tree = CommentTree::build(comments);
        self.view = PresentationState::new(&self.tree);
        self.edit_drafts
            .retain(|id, _| CommentNode::find_in(&self.tree.roots, id).is_some());
        Ok(())
    }

    pub fn post(&self) -> &Post {
        &self.post
    }

    pub fn tree(&self) -> &CommentTree {
        &self.tree
    }

    pub fn view(&self) -> &PresentationState {
        &self.view
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    /// User-visible description of the last failed action, cleared by the next success
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reply_draft(&self, parent: Option<&CommentId>) -> Option<&str> {
        self.reply_drafts.get(&parent.copied()).map(String::as_str)
    }

    pub fn edit_draft(&self, id: &CommentId) -> Option<&str> {
        self.edit_drafts.get(id).map(String::as_str)
    }

    pub fn visible(&self) -> Vec<VisibleComment<'_>> {
        self.view.visible(&self.tree)
    }

    pub fn toggle(&mut self, id: &CommentId) -> Option<Collapse> {
        self.view.toggle(&self.tree, id)
    }

    /// Expands one comment, returning whether it was collapsed
    pub fn expand(&mut self, id: &CommentId) -> bool {
        self.view.expand(&self.tree, id)
    }

    pub fn expand_all(&mut self) {
        self.view.expand_all(&self.tree);
    }

    /// Opens the reply box under `parent`, expanding it so its replies are shown
    pub fn open_reply(&mut self, parent: Option<&CommentId>) -> Result<(), ActionError> {
        let res = self.check_open_reply(parent);
        self.record(res)
    }

    fn check_open_reply(&mut self, parent: Option<&CommentId>) -> Result<(), ActionError> {
        if self.actor.is_none() {
            return Err(ActionError::RegistrationRequired);
        }
        if let Some(parent) = parent {
            if self.tree.find(parent).is_none() {
                return Err(ActionError::UnknownComment(*parent));
            }
            self.expand_if_has_replies(parent);
            self.view.set_replying(&self.tree, parent, true);
        }
        self.reply_drafts.entry(parent.copied()).or_default();
        Ok(())
    }

    pub fn set_reply_draft(&mut self, parent: Option<&CommentId>, text: String) {
        self.reply_drafts.insert(parent.copied(), text);
    }

    /// Posts a reply under `parent`, or at the top level of the post if None
    ///
    /// On success the reply is inserted in the local tree, with its parent expanded so it
    /// is visible right away. On failure the typed text stays in the reply draft.
    pub async fn submit_reply(
        &mut self,
        parent: Option<&CommentId>,
        content: &str,
        image_url: Option<String>,
    ) -> Result<CommentId, ActionError> {
        self.reply_drafts
            .insert(parent.copied(), String::from(content));
        let res = self.do_submit_reply(parent, content, image_url).await;
        self.record(res)
    }

    async fn do_submit_reply(
        &mut self,
        parent: Option<&CommentId>,
        content: &str,
        image_url: Option<String>,
    ) -> Result<CommentId, ActionError> {
        if self.actor.is_none() {
            return Err(ActionError::RegistrationRequired);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ActionError::EmptyContent);
        }
        let new_comment = NewComment {
            parent_id: parent.copied(),
            content: String::from(content),
            image_url,
        };
        let record = bounded(
            self.config.request_timeout,
            self.api.create_comment(self.post.id, new_comment),
        )
        .await?;
        let id = record.id;
        tracing::debug!(comment = ?id, ?parent, "reply created");

        self.reply_drafts.remove(&parent.copied());
        if let Some(parent) = parent {
            self.view.set_replying(&self.tree, parent, false);
            self.view.expand(&self.tree, parent);
        }
        let depth = match parent {
            None => Some(0),
            Some(p) => self.tree.depth_of(p).map(|d| d + 1),
        };
        let inserted = match depth {
            Some(depth) => {
                let inserted = self.tree.insert_reply(parent, CommentNode::from(record));
                if inserted {
                    self.view.register(id, depth);
                }
                inserted
            }
            None => false,
        };
        if !inserted {
            // The parent vanished from the local view, only a refetch can show the reply.
            // The reply is stored by now: a failed refetch is not a failed reply.
            tracing::info!(comment = ?id, "reply parent not displayed, reloading post");
            if let Err(e) = self.reload().await {
                tracing::warn!(comment = ?id, error = %e, "reply posted, but reloading failed");
            }
        }
        Ok(id)
    }

    /// Switches a comment to edit mode, seeding the edit draft with its current text
    pub fn start_edit(&mut self, id: &CommentId) -> Result<(), ActionError> {
        let res = self.check_author(id).map(|content| {
            self.edit_drafts.entry(*id).or_insert(content);
            self.view.set_editing(&self.tree, id, true);
        });
        self.record(res)
    }

    pub fn cancel_edit(&mut self, id: &CommentId) {
        self.edit_drafts.remove(id);
        self.view.set_editing(&self.tree, id, false);
    }

    /// Saves new content for a comment the actor wrote
    pub async fn submit_edit(&mut self, id: &CommentId, content: &str) -> Result<(), ActionError> {
        self.edit_drafts.insert(*id, String::from(content));
        let res = self.do_submit_edit(id, content).await;
        self.record(res)
    }

    async fn do_submit_edit(&mut self, id: &CommentId, content: &str) -> Result<(), ActionError> {
        self.check_author(id)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ActionError::EmptyContent);
        }
        let edit = EditComment {
            content: String::from(content),
        };
        let record = bounded(
            self.config.request_timeout,
            self.api.edit_comment(*id, edit),
        )
        .await?;
        tracing::debug!(comment = ?id, "comment edited");
        self.tree.mark_edited(id, record.content.clone());
        self.tree.refresh_timestamps(&record);
        self.edit_drafts.remove(id);
        self.view.set_editing(&self.tree, id, false);
        Ok(())
    }

    /// Asks the server to delete a comment, then hides it locally
    ///
    /// The server decides whether the actor may delete it; the local tree is only
    /// changed once the server agreed.
    pub async fn request_delete(&mut self, id: &CommentId) -> Result<(), ActionError> {
        let res = self.do_request_delete(id).await;
        self.record(res)
    }

    async fn do_request_delete(&mut self, id: &CommentId) -> Result<(), ActionError> {
        if self.actor.is_none() {
            return Err(ActionError::RegistrationRequired);
        }
        self.tree
            .find(id)
            .filter(|n| !n.is_deleted())
            .ok_or(ActionError::UnknownComment(*id))?;
        bounded(self.config.request_timeout, self.api.delete_comment(*id)).await?;
        tracing::debug!(comment = ?id, policy = ?self.config.delete_policy, "comment deleted");
        match self.config.delete_policy {
            DeletePolicy::RemoveSubtree => {
                self.tree.remove_node(id);
                self.view.retain_present(&self.tree);
                let tree = &self.tree;
                self.edit_drafts.retain(|id, _| tree.find(id).is_some());
            }
            DeletePolicy::Tombstone => {
                self.tree.tombstone(id, Utc::now());
                self.edit_drafts.remove(id);
                self.view.set_editing(&self.tree, id, false);
            }
        }
        Ok(())
    }

    /// Returns the current content of `id` if the actor wrote it
    fn check_author(&self, id: &CommentId) -> Result<String, ActionError> {
        let actor = self.actor.ok_or(ActionError::RegistrationRequired)?;
        let node = self
            .tree
            .find(id)
            .filter(|n| !n.is_deleted())
            .ok_or(ActionError::UnknownComment(*id))?;
        if node.author.id != actor {
            return Err(ActionError::NotAuthor);
        }
        Ok(node.content.clone())
    }

    fn expand_if_has_replies(&mut self, id: &CommentId) {
        let has_replies = self.tree.find(id).map(|n| n.has_replies()).unwrap_or(false);
        if has_replies && self.view.collapse(id) == Some(Collapse::Collapsed) {
            self.view.expand(&self.tree, id);
        }
    }

    fn record<T>(&mut self, res: Result<T, ActionError>) -> Result<T, ActionError> {
        match &res {
            Ok(_) => self.last_error = None,
            Err(e) => {
                tracing::warn!(error = %e, "comment action failed");
                self.last_error = Some(e.user_message());
            }
        }
        res
    }
}
