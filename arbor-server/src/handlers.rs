use arbor_api::{
    AuthToken, CommentId, CommentRecord, EditComment, Forest, NewComment, NewForest, NewPost,
    NewSession, NewUser, Post, PostId, PostWithComments, User, UserId, Uuid,
};
use arbor_store::SharedStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{extractors::*, Error};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    State(store): State<SharedStore>,
    Checked(data): Checked<NewUser>,
) -> Result<(StatusCode, Json<User>), Error> {
    let user = store.lock().await.admin_create_user(data)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn auth(
    State(store): State<SharedStore>,
    ApiJson(data): ApiJson<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    Ok(Json(store.lock().await.auth(data)?))
}

pub async fn unauth(
    PreAuth(token): PreAuth,
    State(store): State<SharedStore>,
) -> Result<(), Error> {
    Ok(store.lock().await.unauth(token)?)
}

pub async fn whoami(auth: Auth) -> Json<UserId> {
    Json(auth.user)
}

pub async fn fetch_users(
    auth: Auth,
    State(store): State<SharedStore>,
) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(store.lock().await.fetch_users(auth.token)?))
}

pub async fn add_friend(
    auth: Auth,
    State(store): State<SharedStore>,
    Path(user): Path<Uuid>,
) -> Result<(), Error> {
    Ok(store.lock().await.add_friend(auth.token, UserId(user))?)
}

pub async fn create_forest(
    auth: Auth,
    State(store): State<SharedStore>,
    Checked(data): Checked<NewForest>,
) -> Result<(StatusCode, Json<Forest>), Error> {
    let forest = store.lock().await.create_forest(auth.token, data)?;
    Ok((StatusCode::CREATED, Json(forest)))
}

pub async fn create_post(
    auth: Auth,
    State(store): State<SharedStore>,
    Checked(data): Checked<NewPost>,
) -> Result<(StatusCode, Json<Post>), Error> {
    let post = store.lock().await.create_post(auth.token, data)?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn fetch_post(
    MaybeAuth(token): MaybeAuth,
    State(store): State<SharedStore>,
    Path(post): Path<Uuid>,
) -> Result<Json<PostWithComments>, Error> {
    Ok(Json(
        store
            .lock()
            .await
            .fetch_post_with_comments(token, PostId(post))?,
    ))
}

pub async fn create_comment(
    auth: Auth,
    State(store): State<SharedStore>,
    Path(post): Path<Uuid>,
    Checked(data): Checked<NewComment>,
) -> Result<(StatusCode, Json<CommentRecord>), Error> {
    let comment = store
        .lock()
        .await
        .create_comment(Some(auth.token), PostId(post), data)?;
    tracing::debug!(user = ?auth.user, comment = ?comment.id, "comment created");
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn edit_comment(
    auth: Auth,
    State(store): State<SharedStore>,
    Path(comment): Path<Uuid>,
    Checked(data): Checked<EditComment>,
) -> Result<Json<CommentRecord>, Error> {
    Ok(Json(store.lock().await.edit_comment(
        Some(auth.token),
        CommentId(comment),
        data,
    )?))
}

pub async fn delete_comment(
    auth: Auth,
    State(store): State<SharedStore>,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    store
        .lock()
        .await
        .delete_comment(Some(auth.token), CommentId(comment))?;
    tracing::debug!(user = ?auth.user, ?comment, "comment deleted");
    Ok(())
}
