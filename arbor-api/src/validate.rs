use crate::{EditComment, Error, NewComment, NewForest, NewPost, NewUser};

/// Request bodies that can be checked before reaching the store
pub trait Validate {
    fn validate(&self) -> Result<(), Error>;
}

/// Request bodies whose free-form text gets normalized before being stored
pub trait Sanitize {
    fn sanitize(self) -> Self;
}

/// Validates `body` as received, then sanitizes it and checks that the result is still valid
///
/// Sanitizing can empty a body that only held control characters, hence the second check.
pub fn checked<T: Validate + Sanitize>(body: T) -> Result<T, Error> {
    body.validate()?;
    let body = body.sanitize();
    body.validate()?;
    Ok(body)
}

impl Validate for NewComment {
    fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content)?;
        if let Some(url) = &self.image_url {
            crate::validate_image_url(url)?;
        }
        Ok(())
    }
}

impl Sanitize for NewComment {
    fn sanitize(self) -> NewComment {
        NewComment {
            parent_id: self.parent_id,
            content: crate::sanitize_content(&self.content),
            image_url: self.image_url.map(|u| u.trim().to_string()),
        }
    }
}

impl Validate for EditComment {
    fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content)
    }
}

impl Sanitize for EditComment {
    fn sanitize(self) -> EditComment {
        EditComment {
            content: crate::sanitize_content(&self.content),
        }
    }
}

impl Validate for NewPost {
    fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content)
    }
}

impl Sanitize for NewPost {
    fn sanitize(self) -> NewPost {
        NewPost {
            content: crate::sanitize_content(&self.content),
            forest: self.forest,
        }
    }
}

impl Validate for NewForest {
    fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.name)
    }
}

impl Sanitize for NewForest {
    fn sanitize(self) -> NewForest {
        NewForest {
            name: self.name.trim().to_string(),
            visibility: self.visibility,
        }
    }
}

impl Validate for NewUser {
    fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.name)?;
        crate::validate_string(&self.password)?;
        if let Some(avatar) = &self.avatar {
            crate::validate_image_url(avatar)?;
        }
        Ok(())
    }
}

impl Sanitize for NewUser {
    fn sanitize(self) -> NewUser {
        self
    }
}
