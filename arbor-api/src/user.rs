use crate::STUB_UUID;

use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

/// Attribution of a post or comment, as displayed next to it
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

impl From<User> for Author {
    fn from(u: User) -> Author {
        Author {
            id: u.id,
            name: u.name,
            avatar: u.avatar,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub password: String,
    pub avatar: Option<String>,
}

impl NewUser {
    pub fn new(id: UserId, name: String, password: String) -> NewUser {
        NewUser {
            id,
            name,
            password,
            avatar: None,
        }
    }
}
