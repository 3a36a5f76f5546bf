use std::{
    collections::{btree_map, BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use arbor_api::{
    checked, AuthToken, CommentApi, CommentId, CommentRecord, EditComment, Error, Forest,
    ForestId, NewComment, NewForest, NewPost, NewSession, NewUser, Post, PostId, PostWithComments,
    User, UserId, Uuid, Validate, Visibility,
};
use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};

/// In-memory record store holding users, forests, posts and their comments
pub struct Store {
    users: BTreeMap<UserId, DbUser>,
    forests: HashMap<ForestId, Forest>,
    posts: HashMap<PostId, Post>,

    /// Every comment ever created, in creation order, deleted ones included
    comments: Vec<CommentRecord>,
    bcrypt_cost: u32,
}

#[derive(Debug)]
struct DbUser {
    user: User,
    pass_hash: String,
    sessions: HashMap<AuthToken, Device>,
    friends: BTreeSet<UserId>,
}

#[derive(Debug)]
struct Device(String);

impl Default for Store {
    fn default() -> Store {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Store {
        Store::with_bcrypt_cost(bcrypt::DEFAULT_COST)
    }

    /// Tests use the minimal cost to keep password hashing fast
    pub fn with_bcrypt_cost(bcrypt_cost: u32) -> Store {
        Store {
            users: BTreeMap::new(),
            forests: HashMap::new(),
            posts: HashMap::new(),
            comments: Vec::new(),
            bcrypt_cost,
        }
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    pub fn admin_create_user(&mut self, u: NewUser) -> Result<User, Error> {
        u.validate()?;

        if self.users.values().any(|db| db.user.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                let pass_hash = bcrypt::hash(&u.password, self.bcrypt_cost)
                    .map_err(|e| Error::Unknown(format!("failed hashing password: {e}")))?;
                let user = User {
                    id: u.id,
                    name: u.name,
                    avatar: u.avatar,
                };
                tracing::info!(user = ?user.id, name = %user.name, "created user");
                entry.insert(DbUser {
                    user: user.clone(),
                    pass_hash,
                    sessions: HashMap::new(),
                    friends: BTreeSet::new(),
                });
                Ok(user)
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let u = self
            .users
            .values_mut()
            .find(|u| u.user.name == s.user)
            .ok_or(Error::PermissionDenied)?;
        let valid = bcrypt::verify(&s.password, &u.pass_hash)
            .map_err(|e| Error::Unknown(format!("failed verifying password: {e}")))?;
        if !valid {
            return Err(Error::PermissionDenied);
        }
        let tok = AuthToken(Uuid::new_v4());
        u.sessions.insert(tok, Device(s.device));
        Ok(tok)
    }

    fn resolve(&self, tok: AuthToken) -> Result<&DbUser, Error> {
        self.users
            .values()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::Unauthenticated)
    }

    fn resolve_mut(&mut self, tok: AuthToken) -> Result<&mut DbUser, Error> {
        self.users
            .values_mut()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::Unauthenticated)
    }

    /// The acting user, or Unauthenticated for anonymous and unknown tokens
    fn actor(&self, tok: Option<AuthToken>) -> Result<&DbUser, Error> {
        self.resolve(tok.ok_or(Error::Unauthenticated)?)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        let u = self.resolve_mut(tok)?;
        if let Some(Device(device)) = u.sessions.remove(&tok) {
            tracing::debug!(user = ?u.user.id, %device, "closed session");
        }
        Ok(())
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        Ok(self.resolve(tok)?.user.id)
    }

    pub fn fetch_users(&self, tok: AuthToken) -> Result<Vec<User>, Error> {
        self.resolve(tok)?;
        Ok(self.users.values().map(|u| u.user.clone()).collect())
    }

    /// Makes `tok`'s user and `other` friends with each other
    pub fn add_friend(&mut self, tok: AuthToken, other: UserId) -> Result<(), Error> {
        let me = self.resolve(tok)?.user.id;
        if me == other {
            return Err(Error::PermissionDenied);
        }
        let them = self
            .users
            .get_mut(&other)
            .ok_or(Error::UserNotFound(other))?;
        them.friends.insert(me);
        if let Some(me) = self.users.get_mut(&me) {
            me.friends.insert(other);
        }
        Ok(())
    }

    pub fn create_forest(&mut self, tok: AuthToken, f: NewForest) -> Result<Forest, Error> {
        let owner = self.resolve(tok)?.user.id;
        let f = checked(f)?;
        let forest = Forest {
            id: ForestId(Uuid::new_v4()),
            owner,
            name: f.name,
            visibility: f.visibility,
        };
        self.forests.insert(forest.id, forest.clone());
        Ok(forest)
    }

    /// Posts can only be added to forests the poster owns
    pub fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<Post, Error> {
        let author = self.resolve(tok)?.user.clone();
        let p = checked(p)?;
        if let Some(forest) = p.forest {
            let f = self
                .forests
                .get(&forest)
                .ok_or(Error::ForestNotFound(forest))?;
            if f.owner != author.id {
                return Err(Error::PermissionDenied);
            }
        }
        let post = Post {
            id: PostId(Uuid::new_v4()),
            author: author.into(),
            content: p.content,
            forest: p.forest,
            created_at: Utc::now(),
        };
        self.posts.insert(post.id, post.clone());
        Ok(post)
    }

    /// Private forests are visible to their owner and the owner's friends only
    fn can_see(&self, viewer: Option<UserId>, post: &Post) -> bool {
        let forest = match post.forest.and_then(|f| self.forests.get(&f)) {
            None => return true,
            Some(f) => f,
        };
        match (forest.visibility, viewer) {
            (Visibility::Public, _) => true,
            (Visibility::Private, None) => false,
            (Visibility::Private, Some(viewer)) => {
                viewer == forest.owner
                    || self
                        .users
                        .get(&forest.owner)
                        .map(|o| o.friends.contains(&viewer))
                        .unwrap_or(false)
            }
        }
    }

    fn visible_post(&self, viewer: Option<UserId>, post: PostId) -> Result<&Post, Error> {
        self.posts
            .get(&post)
            .filter(|p| self.can_see(viewer, p))
            .ok_or(Error::PostNotFound(post))
    }

    /// Index of a comment that has not been deleted
    fn live_comment(&self, id: CommentId) -> Result<usize, Error> {
        self.comments
            .iter()
            .position(|c| c.id == id && !c.is_deleted())
            .ok_or(Error::CommentNotFound(id))
    }

    pub fn create_comment(
        &mut self,
        tok: Option<AuthToken>,
        post: PostId,
        c: NewComment,
    ) -> Result<CommentRecord, Error> {
        let author = self.actor(tok)?.user.clone();
        let c = checked(c)?;
        self.visible_post(Some(author.id), post)?;
        if let Some(parent) = c.parent_id {
            let p = self.live_comment(parent)?;
            if self.comments[p].post_id != post {
                return Err(Error::ParentNotInPost { parent, post });
            }
        }
        let record = CommentRecord {
            id: CommentId(Uuid::new_v4()),
            content: c.content,
            author: author.into(),
            parent_id: c.parent_id,
            post_id: post,
            image_url: c.image_url,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        tracing::debug!(comment = ?record.id, ?post, parent = ?record.parent_id, "created comment");
        self.comments.push(record.clone());
        Ok(record)
    }

    pub fn edit_comment(
        &mut self,
        tok: Option<AuthToken>,
        id: CommentId,
        e: EditComment,
    ) -> Result<CommentRecord, Error> {
        let actor = self.actor(tok)?.user.id;
        let e = checked(e)?;
        let i = self.live_comment(id)?;
        let c = &mut self.comments[i];
        if c.author.id != actor {
            return Err(Error::PermissionDenied);
        }
        c.content = e.content;
        c.updated_at = Some(Utc::now());
        Ok(c.clone())
    }

    /// Soft delete: the comment stays, with its replies, but only as a tombstone
    pub fn delete_comment(&mut self, tok: Option<AuthToken>, id: CommentId) -> Result<(), Error> {
        let actor = self.actor(tok)?.user.id;
        let i = self.live_comment(id)?;
        let c = &mut self.comments[i];
        if c.author.id != actor {
            tracing::info!(comment = ?id, ?actor, "refused delete by non-author");
            return Err(Error::PermissionDenied);
        }
        c.deleted_at = Some(Utc::now());
        Ok(())
    }

    /// Anonymous readers (None) can read posts outside of private forests
    pub fn fetch_post_with_comments(
        &self,
        tok: Option<AuthToken>,
        post: PostId,
    ) -> Result<PostWithComments, Error> {
        let viewer = match tok {
            None => None,
            Some(tok) => Some(self.resolve(tok)?.user.id),
        };
        let post = self.visible_post(viewer, post)?.clone();
        let mut comments = self
            .comments
            .iter()
            .filter(|c| c.post_id == post.id)
            .cloned()
            .map(CommentRecord::tombstoned)
            .collect::<Vec<_>>();
        comments.sort_by_key(|c| c.created_at);
        Ok(PostWithComments { post, comments })
    }
}

/// A store shared between concurrent users, such as server handlers
#[derive(Clone)]
pub struct SharedStore(Arc<Mutex<Store>>);

impl SharedStore {
    pub fn new(store: Store) -> SharedStore {
        SharedStore(Arc::new(Mutex::new(store)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.0.lock().await
    }

    pub fn session(&self, token: Option<AuthToken>) -> StoreSession {
        StoreSession {
            store: self.clone(),
            token,
        }
    }
}

/// `CommentApi` talking to a store in-process, as the given token
#[derive(Clone)]
pub struct StoreSession {
    store: SharedStore,
    token: Option<AuthToken>,
}

#[async_trait::async_trait]
impl CommentApi for StoreSession {
    async fn create_comment(
        &mut self,
        post: PostId,
        comment: NewComment,
    ) -> Result<CommentRecord, Error> {
        self.store
            .lock()
            .await
            .create_comment(self.token, post, comment)
    }

    async fn edit_comment(
        &mut self,
        comment: CommentId,
        edit: EditComment,
    ) -> Result<CommentRecord, Error> {
        self.store.lock().await.edit_comment(self.token, comment, edit)
    }

    async fn delete_comment(&mut self, comment: CommentId) -> Result<(), Error> {
        self.store.lock().await.delete_comment(self.token, comment)
    }

    async fn fetch_post_with_comments(&mut self, post: PostId) -> Result<PostWithComments, Error> {
        self.store
            .lock()
            .await
            .fetch_post_with_comments(self.token, post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(store: &mut Store, name: &str) -> (UserId, AuthToken) {
        let id = UserId(Uuid::new_v4());
        store
            .admin_create_user(NewUser::new(id, name.to_string(), format!("{name} pass")))
            .unwrap();
        let tok = store
            .auth(NewSession {
                user: name.to_string(),
                password: format!("{name} pass"),
                device: String::from("test"),
            })
            .unwrap();
        (id, tok)
    }

    fn setup() -> (Store, AuthToken, AuthToken, PostId) {
        let mut store = Store::with_bcrypt_cost(4);
        let (_, alice) = user(&mut store, "alice");
        let (_, bob) = user(&mut store, "bob");
        let post = store
            .create_post(alice, NewPost {
                content: String::from("a tree"),
                forest: None,
            })
            .unwrap();
        (store, alice, bob, post.id)
    }

    fn comment(content: &str, parent: Option<CommentId>) -> NewComment {
        NewComment::new(parent, content.to_string())
    }

    #[test]
    fn users_and_sessions() {
        let mut store = Store::with_bcrypt_cost(4);
        let (alice_id, alice) = user(&mut store, "alice");
        assert_eq!(store.whoami(alice), Ok(alice_id));
        assert_eq!(store.test_num_users(), 1);
        assert!(matches!(
            store.admin_create_user(NewUser::new(
                UserId(Uuid::new_v4()),
                String::from("alice"),
                String::from("x")
            )),
            Err(Error::NameAlreadyUsed(_))
        ));
        assert_eq!(
            store.auth(NewSession {
                user: String::from("alice"),
                password: String::from("wrong"),
                device: String::from("test"),
            }),
            Err(Error::PermissionDenied)
        );
        store.unauth(alice).unwrap();
        assert_eq!(store.whoami(alice), Err(Error::Unauthenticated));
    }

    #[test]
    fn comments_come_back_flat_and_ordered() {
        let (mut store, alice, bob, post) = setup();
        let a = store.create_comment(Some(alice), post, comment("a", None)).unwrap();
        let b = store
            .create_comment(Some(bob), post, comment("b", Some(a.id)))
            .unwrap();
        let c = store.create_comment(Some(alice), post, comment("c", None)).unwrap();
        let fetched = store.fetch_post_with_comments(None, post).unwrap();
        let ids = fetched.comments.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(fetched.comments[1].parent_id, Some(a.id));
    }

    #[test]
    fn anonymous_cannot_comment() {
        let (mut store, _, _, post) = setup();
        assert_eq!(
            store.create_comment(None, post, comment("hi", None)),
            Err(Error::Unauthenticated)
        );
        assert_eq!(
            store.create_comment(Some(AuthToken::stub()), post, comment("hi", None)),
            Err(Error::Unauthenticated)
        );
    }

    #[test]
    fn comment_is_sanitized_and_validated() {
        let (mut store, alice, _, post) = setup();
        let c = store
            .create_comment(Some(alice), post, comment("  hi\r\nthere ", None))
            .unwrap();
        assert_eq!(c.content, "hi\nthere");
        assert_eq!(
            store.create_comment(Some(alice), post, comment(" \t ", None)),
            Err(Error::EmptyContent)
        );
    }

    #[test]
    fn parent_must_be_in_the_same_post() {
        let (mut store, alice, _, post) = setup();
        let other = store
            .create_post(alice, NewPost {
                content: String::from("another tree"),
                forest: None,
            })
            .unwrap();
        let a = store.create_comment(Some(alice), post, comment("a", None)).unwrap();
        assert_eq!(
            store.create_comment(Some(alice), other.id, comment("b", Some(a.id))),
            Err(Error::ParentNotInPost {
                parent: a.id,
                post: other.id
            })
        );
        let missing = CommentId(Uuid::new_v4());
        assert_eq!(
            store.create_comment(Some(alice), post, comment("b", Some(missing))),
            Err(Error::CommentNotFound(missing))
        );
    }

    #[test]
    fn only_the_author_edits_and_deletes() {
        let (mut store, alice, bob, post) = setup();
        let a = store.create_comment(Some(alice), post, comment("a", None)).unwrap();
        let edit = EditComment {
            content: String::from("changed"),
        };
        assert_eq!(
            store.edit_comment(Some(bob), a.id, edit.clone()),
            Err(Error::PermissionDenied)
        );
        assert_eq!(store.delete_comment(Some(bob), a.id), Err(Error::PermissionDenied));

        let edited = store.edit_comment(Some(alice), a.id, edit).unwrap();
        assert_eq!(edited.content, "changed");
        assert!(edited.is_edited());
    }

    #[test]
    fn delete_keeps_replies() {
        let (mut store, alice, bob, post) = setup();
        let a = store.create_comment(Some(alice), post, comment("a", None)).unwrap();
        let b = store
            .create_comment(Some(bob), post, comment("b", Some(a.id)))
            .unwrap();
        store.delete_comment(Some(alice), a.id).unwrap();
        assert_eq!(
            store.delete_comment(Some(alice), a.id),
            Err(Error::CommentNotFound(a.id))
        );

        let fetched = store.fetch_post_with_comments(Some(bob), post).unwrap();
        assert_eq!(fetched.comments.len(), 2);
        let tomb = &fetched.comments[0];
        assert!(tomb.is_deleted());
        assert!(tomb.content.is_empty());
        assert_eq!(fetched.comments[1].id, b.id);
        assert_eq!(fetched.comments[1].content, "b");
    }

    #[test]
    fn private_forests() {
        let mut store = Store::with_bcrypt_cost(4);
        let (alice_id, alice) = user(&mut store, "alice");
        let (_, bob) = user(&mut store, "bob");
        let (_, carol) = user(&mut store, "carol");
        let forest = store
            .create_forest(alice, NewForest {
                name: String::from("garden"),
                visibility: Visibility::Private,
            })
            .unwrap();
        let post = store
            .create_post(alice, NewPost {
                content: String::from("secret"),
                forest: Some(forest.id),
            })
            .unwrap();
        assert_eq!(
            store.create_post(bob, NewPost {
                content: String::from("intruder"),
                forest: Some(forest.id),
            }),
            Err(Error::PermissionDenied)
        );

        assert_eq!(
            store.fetch_post_with_comments(None, post.id),
            Err(Error::PostNotFound(post.id))
        );
        assert_eq!(
            store.fetch_post_with_comments(Some(bob), post.id),
            Err(Error::PostNotFound(post.id))
        );
        store.add_friend(bob, alice_id).unwrap();
        assert!(store.fetch_post_with_comments(Some(bob), post.id).is_ok());
        assert!(store.fetch_post_with_comments(Some(alice), post.id).is_ok());
        assert!(store.fetch_post_with_comments(Some(carol), post.id).is_err());
        assert_eq!(
            store.create_comment(Some(carol), post.id, comment("hi", None)),
            Err(Error::PostNotFound(post.id))
        );
    }

    #[tokio::test]
    async fn session_implements_comment_api() {
        let (store, alice, _, post) = setup();
        let shared = SharedStore::new(store);
        let mut session = shared.session(Some(alice));
        let c = session
            .create_comment(post, comment("through the trait", None))
            .await
            .unwrap();
        let fetched = shared.session(None).fetch_post_with_comments(post).await.unwrap();
        assert_eq!(fetched.comments, vec![c.clone()]);
        session.delete_comment(c.id).await.unwrap();
        let store = shared.lock().await;
        let fetched = store.fetch_post_with_comments(None, post).unwrap();
        assert_eq!(fetched.comments.len(), 1);
        assert!(fetched.comments[0].is_deleted());
    }
}
