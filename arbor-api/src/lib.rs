use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

/// Maximum number of characters in a comment or post body
pub const MAX_CONTENT_LEN: usize = 10_000;

/// Maximum length of an attached image reference, data URLs included
pub const MAX_IMAGE_URL_LEN: usize = 5 * 1024 * 1024;

pub const MAX_NAME_LEN: usize = 64;

mod api;
pub use api::CommentApi;

mod auth;
pub use auth::{AuthToken, NewSession};

mod comment;
pub use comment::{CommentId, CommentRecord, EditComment, NewComment};

mod error;
pub use error::Error;

mod post;
pub use post::{Forest, ForestId, NewForest, NewPost, Post, PostId, PostWithComments, Visibility};

mod user;
pub use user::{Author, NewUser, User, UserId};

mod validate;
pub use validate::{checked, Sanitize, Validate};

// The validation functions below are shared by the server, the store and the client.
// Each of them must be cheap enough to run on every request.

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Checks a comment or post body as the user typed it
pub fn validate_content(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptyContent);
    }
    let len = trimmed.chars().count();
    if len > MAX_CONTENT_LEN {
        return Err(Error::ContentTooLong {
            len,
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(())
}

pub fn validate_image_url(url: &str) -> Result<(), Error> {
    validate_string(url)?;
    let url = url.trim();
    let scheme_ok = ["https://", "http://", "data:image/"]
        .iter()
        .any(|prefix| url.starts_with(prefix));
    if !scheme_ok || url.len() > MAX_IMAGE_URL_LEN || url.chars().any(char::is_whitespace) {
        return Err(Error::InvalidImageUrl(url.chars().take(64).collect()));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    validate_string(name)?;
    let valid_chars = name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.');
    let len = name.chars().count();
    if !valid_chars || len == 0 || len > MAX_NAME_LEN {
        return Err(Error::InvalidName(String::from(name)));
    }
    Ok(())
}

/// Normalizes line endings, drops control characters other than newlines and tabs, and
/// trims surrounding whitespace. Applying it twice is the same as applying it once.
pub fn sanitize_content(s: &str) -> String {
    let normalized = s.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_limits() {
        assert_eq!(validate_content("  \n\t "), Err(Error::EmptyContent));
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content(&"a".repeat(MAX_CONTENT_LEN)), Ok(()));
        assert_eq!(
            validate_content(&"a".repeat(MAX_CONTENT_LEN + 1)),
            Err(Error::ContentTooLong {
                len: MAX_CONTENT_LEN + 1,
                max: MAX_CONTENT_LEN,
            })
        );
        // surrounding whitespace does not count against the limit
        let padded = format!("   {}   ", "a".repeat(MAX_CONTENT_LEN));
        assert_eq!(validate_content(&padded), Ok(()));
        assert!(matches!(
            validate_content("a\0b"),
            Err(Error::NullByteInString(_))
        ));
    }

    #[test]
    fn content_length_counts_chars() {
        let text = "é".repeat(MAX_CONTENT_LEN);
        assert!(text.len() > MAX_CONTENT_LEN);
        assert_eq!(validate_content(&text), Ok(()));
    }

    #[test]
    fn image_urls() {
        assert_eq!(validate_image_url("https://img.example/a.png"), Ok(()));
        assert_eq!(validate_image_url("data:image/png;base64,AAAA"), Ok(()));
        assert!(validate_image_url("javascript:alert(1)").is_err());
        assert!(validate_image_url("data:text/html;base64,AAAA").is_err());
        assert!(validate_image_url("https://img.example/a b.png").is_err());
    }

    #[test]
    fn names() {
        assert_eq!(validate_name("alice_1.b-c"), Ok(()));
        assert!(validate_name("").is_err());
        assert!(validate_name("with space").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_content("  hi\r\nthere\r "), "hi\nthere");
        assert_eq!(sanitize_content("a\u{7}b\tc\u{1b}[0m"), "ab\tc[0m");
        let once = sanitize_content(" \r\n x\u{0}y \r\n");
        assert_eq!(sanitize_content(&once), once);
        assert_eq!(once, "xy");
    }
}
