use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::{CommentId, ForestId, PostId, UserId};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Comment not found {0:?}")]
    CommentNotFound(CommentId),

    #[error("Post not found {0:?}")]
    PostNotFound(PostId),

    #[error("Forest not found {0:?}")]
    ForestNotFound(ForestId),

    #[error("User not found {0:?}")]
    UserNotFound(UserId),

    #[error("Parent comment {parent:?} does not belong to post {post:?}")]
    ParentNotInPost { parent: CommentId, post: PostId },

    #[error("Content is empty")]
    EmptyContent,

    #[error("Content is too long ({len} characters, at most {max} allowed)")]
    ContentTooLong { len: usize, max: usize },

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid image url {0:?}")]
    InvalidImageUrl(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Too many requests, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::CommentNotFound(_)
            | Error::PostNotFound(_)
            | Error::ForestNotFound(_)
            | Error::UserNotFound(_) => StatusCode::NOT_FOUND,
            Error::ParentNotInPost { .. }
            | Error::EmptyContent
            | Error::ContentTooLong { .. }
            | Error::NullByteInString(_)
            | Error::InvalidImageUrl(_)
            | Error::InvalidName(_)
            | Error::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Error::NameAlreadyUsed(_) | Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Coarse error class, stable across versions
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unknown(_) => "INTERNAL",
            Error::Unauthenticated => "UNAUTHENTICATED",
            Error::PermissionDenied => "FORBIDDEN",
            Error::CommentNotFound(_)
            | Error::PostNotFound(_)
            | Error::ForestNotFound(_)
            | Error::UserNotFound(_) => "NOT_FOUND",
            Error::ParentNotInPost { .. }
            | Error::EmptyContent
            | Error::ContentTooLong { .. }
            | Error::NullByteInString(_)
            | Error::InvalidImageUrl(_)
            | Error::InvalidName(_)
            | Error::InvalidBody(_) => "VALIDATION",
            Error::NameAlreadyUsed(_) | Error::UuidAlreadyUsed(_) => "CONFLICT",
            Error::RateLimited { .. } => "RATE_LIMITED",
        }
    }

    /// Whether the same request may succeed if sent again later, unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unknown(_) | Error::RateLimited { .. })
    }

    pub fn contents(&self) -> Vec<u8> {
        let message = self.to_string();
        let code = self.code();
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "code": code,
                "type": "unknown",
            }),
            Error::Unauthenticated => json!({
                "message": message,
                "code": code,
                "type": "unauthenticated",
            }),
            Error::PermissionDenied => json!({
                "message": message,
                "code": code,
                "type": "permission-denied",
            }),
            Error::CommentNotFound(id) => json!({
                "message": message,
                "code": code,
                "type": "comment-not-found",
                "uuid": id.0,
            }),
            Error::PostNotFound(id) => json!({
                "message": message,
                "code": code,
                "type": "post-not-found",
                "uuid": id.0,
            }),
            Error::ForestNotFound(id) => json!({
                "message": message,
                "code": code,
                "type": "forest-not-found",
                "uuid": id.0,
            }),
            Error::UserNotFound(id) => json!({
                "message": message,
                "code": code,
                "type": "user-not-found",
                "uuid": id.0,
            }),
            Error::ParentNotInPost { parent, post } => json!({
                "message": message,
                "code": code,
                "type": "parent-not-in-post",
                "parent": parent.0,
                "post": post.0,
            }),
            Error::EmptyContent => json!({
                "message": message,
                "code": code,
                "type": "empty-content",
            }),
            Error::ContentTooLong { len, max } => json!({
                "message": message,
                "code": code,
                "type": "content-too-long",
                "len": len,
                "max": max,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "code": code,
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidImageUrl(u) => json!({
                "message": message,
                "code": code,
                "type": "invalid-image-url",
                "string": u,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "code": code,
                "type": "invalid-name",
                "name": n,
            }),
            Error::InvalidBody(msg) => json!({
                "message": message,
                "code": code,
                "type": "invalid-body",
                "string": msg,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "code": code,
                "type": "conflict-name",
                "name": n,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "code": code,
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::RateLimited { retry_after_secs } => json!({
                "message": message,
                "code": code,
                "type": "rate-limited",
                "retry_after_secs": retry_after_secs,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |name: &str| -> anyhow::Result<String> {
            data.get(name)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents has no string field {name:?}"))
        };
        let uuid_field = |name: &str| -> anyhow::Result<Uuid> {
            data.get(name)
                .and_then(|u| u.as_str())
                .and_then(|u| Uuid::from_str(u).ok())
                .ok_or_else(|| anyhow!("error contents has no uuid field {name:?}"))
        };
        let int_field = |name: &str| -> anyhow::Result<u64> {
            data.get(name)
                .and_then(|i| i.as_u64())
                .ok_or_else(|| anyhow!("error contents has no integer field {name:?}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "unauthenticated" => Error::Unauthenticated,
                "permission-denied" => Error::PermissionDenied,
                "comment-not-found" => Error::CommentNotFound(CommentId(uuid_field("uuid")?)),
                "post-not-found" => Error::PostNotFound(PostId(uuid_field("uuid")?)),
                "forest-not-found" => Error::ForestNotFound(ForestId(uuid_field("uuid")?)),
                "user-not-found" => Error::UserNotFound(UserId(uuid_field("uuid")?)),
                "parent-not-in-post" => Error::ParentNotInPost {
                    parent: CommentId(uuid_field("parent")?),
                    post: PostId(uuid_field("post")?),
                },
                "empty-content" => Error::EmptyContent,
                "content-too-long" => Error::ContentTooLong {
                    len: int_field("len")? as usize,
                    max: int_field("max")? as usize,
                },
                "null-byte" => Error::NullByteInString(str_field("string")?),
                "invalid-image-url" => Error::InvalidImageUrl(str_field("string")?),
                "invalid-name" => Error::InvalidName(str_field("name")?),
                "invalid-body" => Error::InvalidBody(str_field("string")?),
                "conflict-name" => Error::NameAlreadyUsed(str_field("name")?),
                "conflict-uuid" => Error::UuidAlreadyUsed(uuid_field("uuid")?),
                "rate-limited" => Error::RateLimited {
                    retry_after_secs: int_field("retry_after_secs")?,
                },
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
