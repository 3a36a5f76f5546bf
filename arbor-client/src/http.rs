use crate::api::{
    self, AuthToken, CommentApi, CommentId, CommentRecord, EditComment, Error, Forest, NewComment,
    NewForest, NewPost, NewSession, NewUser, Post, PostId, PostWithComments, User, UserId,
};

/// `CommentApi` over the server's JSON routes
#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    host: String,
    token: Option<AuthToken>,
}

fn network_error(e: reqwest::Error) -> Error {
    Error::Unknown(format!("failed talking to server: {e}"))
}

/// Turns a non-success response into the error the server serialized into it
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.map_err(network_error)?;
    match Error::parse(&body) {
        Ok(e) => Err(e),
        Err(parse_err) => {
            tracing::error!(?status, error = ?parse_err, "server returned an unparseable error");
            Err(Error::Unknown(format!("server returned status {status}")))
        }
    }
}

async fn json<R>(resp: reqwest::Response) -> Result<R, Error>
where
    R: for<'de> serde::Deserialize<'de>,
{
    check(resp)
        .await?
        .json()
        .await
        .map_err(|e| Error::Unknown(format!("failed to parse server response: {e}")))
}

impl HttpApi {
    pub fn new(host: String, token: Option<AuthToken>) -> HttpApi {
        HttpApi {
            client: reqwest::Client::new(),
            host: String::from(host.trim_end_matches('/')),
            token,
        }
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.token
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, format!("{}/api/{}", self.host, path));
        match self.token {
            Some(t) => req.bearer_auth(t.0),
            None => req,
        }
    }

    /// Opens a session, which later requests made through `self` will use
    pub async fn auth(&mut self, session: &NewSession) -> Result<AuthToken, Error> {
        let resp = self
            .request(reqwest::Method::POST, "auth")
            .json(session)
            .send()
            .await
            .map_err(network_error)?;
        let token: AuthToken = json(resp).await?;
        self.token = Some(token);
        Ok(token)
    }

    pub async fn unauth(&mut self) -> Result<(), Error> {
        let resp = self
            .request(reqwest::Method::POST, "unauth")
            .send()
            .await
            .map_err(network_error)?;
        check(resp).await?;
        self.token = None;
        Ok(())
    }

    pub async fn whoami(&self) -> Result<UserId, Error> {
        let resp = self
            .request(reqwest::Method::GET, "whoami")
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }

    pub async fn fetch_users(&self) -> Result<Vec<User>, Error> {
        let resp = self
            .request(reqwest::Method::GET, "users")
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }

    /// Requires the token to be the server's admin token
    pub async fn admin_create_user(&self, user: &NewUser) -> Result<(), Error> {
        let resp = self
            .request(reqwest::Method::POST, "admin/create-user")
            .json(user)
            .send()
            .await
            .map_err(network_error)?;
        check(resp).await?;
        Ok(())
    }

    pub async fn add_friend(&self, user: UserId) -> Result<(), Error> {
        let resp = self
            .request(reqwest::Method::POST, &format!("friends/{}", user.0))
            .send()
            .await
            .map_err(network_error)?;
        check(resp).await?;
        Ok(())
    }

    pub async fn create_forest(&self, forest: &NewForest) -> Result<Forest, Error> {
        let resp = self
            .request(reqwest::Method::POST, "forests")
            .json(forest)
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }

    pub async fn create_post(&self, post: &NewPost) -> Result<Post, Error> {
        let resp = self
            .request(reqwest::Method::POST, "posts")
            .json(post)
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }
}

#[async_trait::async_trait]
impl CommentApi for HttpApi {
    async fn create_comment(
        &mut self,
        post: PostId,
        comment: NewComment,
    ) -> Result<CommentRecord, api::Error> {
        let resp = self
            .request(reqwest::Method::POST, &format!("posts/{}/comments", post.0))
            .json(&comment)
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }

    async fn edit_comment(
        &mut self,
        comment: CommentId,
        edit: EditComment,
    ) -> Result<CommentRecord, api::Error> {
        let resp = self
            .request(reqwest::Method::PATCH, &format!("comments/{}", comment.0))
            .json(&edit)
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }

    async fn delete_comment(&mut self, comment: CommentId) -> Result<(), api::Error> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("comments/{}", comment.0))
            .send()
            .await
            .map_err(network_error)?;
        check(resp).await?;
        Ok(())
    }

    async fn fetch_post_with_comments(
        &mut self,
        post: PostId,
    ) -> Result<PostWithComments, api::Error> {
        let resp = self
            .request(reqwest::Method::GET, &format!("posts/{}", post.0))
            .send()
            .await
            .map_err(network_error)?;
        json(resp).await
    }
}
