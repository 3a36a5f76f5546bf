#![cfg(test)]

use std::{
    cmp, fmt::Debug, net::SocketAddr, ops::RangeTo, panic::AssertUnwindSafe, time::Duration,
};

use arbor_api::{
    AuthToken, CommentId, CommentRecord, EditComment, Error as ApiError, NewComment, NewPost,
    NewSession, NewUser, Post, PostId, PostWithComments, UserId, Uuid,
};
use arbor_store::{SharedStore, Store};
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts},
    http::{self, request, StatusCode},
    Router,
};
use bolero::generator::{bolero_generator, TypeGenerator};
use tower::{Service, ServiceExt};

use crate::{extractors::*, rate_limit::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error(ApiError::Unauthenticated)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

struct Response {
    status: StatusCode,
    headers: http::HeaderMap,
    body: hyper::body::Bytes,
}

impl Response {
    fn parse<R>(&self) -> Result<R, ApiError>
    where
        R: 'static + for<'de> serde::Deserialize<'de>,
    {
        if self.status.is_success() {
            if std::any::TypeId::of::<R>() == std::any::TypeId::of::<()>() {
                // the server returns an empty body in this situation, which does not parse properly with serde_json
                return Ok(serde_json::from_slice(b"null").unwrap());
            }
            return Ok(serde_json::from_slice(&self.body).unwrap_or_else(|err| {
                panic!("failed parsing response body {:?}: {err}", self.body)
            }));
        }
        Err(ApiError::parse(&self.body).unwrap_or_else(|err| {
            panic!("parsing error response body {err}, body is {:?}", self.body)
        }))
    }
}

async fn call(app: &mut Router, req: request::Request<Body>) -> Response {
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    Response {
        status,
        headers,
        body,
    }
}

/// Peer address of test requests that do not pick one
const LOCAL_PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 4000);

async fn raw_request(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: Vec<u8>,
) -> Response {
    let auth = token.map(|token| format!("bearer {token}"));
    raw_request_from(app, LOCAL_PEER, method, uri, auth.as_deref(), body).await
}

/// A request from `peer`, with `auth` as its raw Authorization header
async fn raw_request_from(
    app: &mut Router,
    peer: impl Into<SocketAddr>,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Vec<u8>,
) -> Response {
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .extension(ConnectInfo(peer.into()));
    let req = match auth {
        Some(auth) => req.header(http::header::AUTHORIZATION, auth),
        None => req,
    };
    let req = req.body(Body::from(body)).expect("building request");
    call(app, req).await
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let body = serde_json::to_vec(body).expect("serializing request body to json");
    raw_request(app, method, uri, token, body).await.parse()
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

fn limits(write_burst: u32, login_burst: u32) -> RateLimits {
    RateLimits {
        writes: RateLimiter::new(Limits {
            burst: write_burst,
            window: Duration::from_secs(60),
        }),
        logins: RateLimiter::new(Limits {
            burst: login_burst,
            window: Duration::from_secs(60),
        }),
    }
}

struct TestApp {
    app: Router,
    admin_token: Uuid,
}

impl TestApp {
    fn new(write_burst: u32) -> TestApp {
        TestApp::with_limits(write_burst, u32::MAX)
    }

    fn with_limits(write_burst: u32, login_burst: u32) -> TestApp {
        let admin_token = Uuid::new_v4();
        let app = app(AppState {
            store: SharedStore::new(Store::with_bcrypt_cost(4)),
            admin_token: Some(AuthToken(admin_token)),
            limits: limits(write_burst, login_burst),
        });
        TestApp { app, admin_token }
    }

    async fn user(&mut self, name: &str) -> (UserId, Uuid) {
        let id = UserId(Uuid::new_v4());
        let new_user = NewUser::new(id, String::from(name), String::from("password"));
        let admin = Some(self.admin_token);
        let _: arbor_api::User = run_on_app(
            &mut self.app,
            "POST",
            "/api/admin/create-user",
            admin,
            &new_user,
        )
        .await
        .expect("creating user");
        let session = NewSession {
            user: String::from(name),
            password: String::from("password"),
            device: String::from("test"),
        };
        let token: AuthToken = run_on_app(&mut self.app, "POST", "/api/auth", None, &session)
            .await
            .expect("logging in");
        (id, token.0)
    }

    async fn post(&mut self, token: Uuid) -> PostId {
        let post: Post = run_on_app(
            &mut self.app,
            "POST",
            "/api/posts",
            Some(token),
            &NewPost {
                content: String::from("a tree"),
                forest: None,
            },
        )
        .await
        .expect("creating post");
        post.id
    }

    async fn comment(
        &mut self,
        token: Option<Uuid>,
        post: PostId,
        parent: Option<CommentId>,
        content: &str,
    ) -> Result<CommentRecord, ApiError> {
        run_on_app(
            &mut self.app,
            "POST",
            &format!("/api/posts/{}/comments", post.0),
            token,
            &NewComment::new(parent, String::from(content)),
        )
        .await
    }

    async fn fetch(&mut self, token: Option<Uuid>, post: PostId) -> PostWithComments {
        run_on_app(
            &mut self.app,
            "GET",
            &format!("/api/posts/{}", post.0),
            token,
            &(),
        )
        .await
        .expect("fetching post")
    }
}

#[tokio::test]
async fn comment_lifecycle() {
    let mut t = TestApp::new(1000);
    let (_, alice) = t.user("alice").await;
    let (bob_id, bob) = t.user("bob").await;
    let post = t.post(alice).await;

    let req = serde_json::to_vec(&NewComment::new(None, String::from("first"))).unwrap();
    let resp = raw_request(
        &mut t.app,
        "POST",
        &format!("/api/posts/{}/comments", post.0),
        Some(alice),
        req,
    )
    .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let a: CommentRecord = resp.parse().unwrap();

    let b = t.comment(Some(bob), post, Some(a.id), "reply").await.unwrap();
    assert_eq!(b.parent_id, Some(a.id));
    assert_eq!(b.author.id, bob_id);

    let fetched = t.fetch(None, post).await;
    assert_eq!(fetched.comments, vec![a.clone(), b.clone()]);

    let uri = format!("/api/comments/{}", a.id.0);
    let edit = EditComment {
        content: String::from("first, edited"),
    };
    let edited: CommentRecord = run_on_app(&mut t.app, "PATCH", &uri, Some(alice), &edit)
        .await
        .unwrap();
    assert_eq!(edited.content, "first, edited");
    assert!(edited.is_edited());
    let res: Result<CommentRecord, _> =
        run_on_app(&mut t.app, "PATCH", &uri, Some(bob), &edit).await;
    assert_eq!(res, Err(ApiError::PermissionDenied));

    let resp = raw_request(&mut t.app, "DELETE", &uri, Some(bob), Vec::new()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.parse::<()>(), Err(ApiError::PermissionDenied));
    assert_eq!(t.fetch(Some(bob), post).await.comments[0], edited);

    let resp = raw_request(&mut t.app, "DELETE", &uri, Some(alice), Vec::new()).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body.is_empty());
    let fetched = t.fetch(None, post).await;
    assert_eq!(fetched.comments.len(), 2);
    assert!(fetched.comments[0].is_deleted());
    assert!(fetched.comments[0].content.is_empty());
    assert_eq!(fetched.comments[1], b);
}

#[tokio::test]
async fn anonymous_cannot_comment() {
    let mut t = TestApp::new(1000);
    let (_, alice) = t.user("alice").await;
    let post = t.post(alice).await;
    assert_eq!(
        t.comment(None, post, None, "hello").await,
        Err(ApiError::Unauthenticated)
    );
    assert_eq!(
        t.comment(Some(Uuid::new_v4()), post, None, "hello").await,
        Err(ApiError::Unauthenticated)
    );
}

#[tokio::test]
async fn content_is_validated_then_sanitized() {
    let mut t = TestApp::new(1000);
    let (_, alice) = t.user("alice").await;
    let post = t.post(alice).await;

    assert_eq!(
        t.comment(Some(alice), post, None, " \n\t ").await,
        Err(ApiError::EmptyContent)
    );
    // only control characters: valid as typed, empty once sanitized
    assert_eq!(
        t.comment(Some(alice), post, None, "\u{7}\u{1b}").await,
        Err(ApiError::EmptyContent)
    );
    let long = "a".repeat(arbor_api::MAX_CONTENT_LEN + 1);
    assert!(matches!(
        t.comment(Some(alice), post, None, &long).await,
        Err(ApiError::ContentTooLong { .. })
    ));

    let c = t
        .comment(Some(alice), post, None, "  hello\r\nworld\u{7} ")
        .await
        .unwrap();
    assert_eq!(c.content, "hello\nworld");
}

#[tokio::test]
async fn malformed_bodies() {
    let mut t = TestApp::new(1000);
    let (_, alice) = t.user("alice").await;
    let post = t.post(alice).await;
    let uri = format!("/api/posts/{}/comments", post.0);

    let resp = raw_request(&mut t.app, "POST", &uri, Some(alice), b"{not json".to_vec()).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        resp.parse::<CommentRecord>(),
        Err(ApiError::InvalidBody(_))
    ));
    let body = serde_json::to_vec(&serde_json::json!({ "text": "wrong field" })).unwrap();
    let resp = raw_request(&mut t.app, "POST", &uri, Some(alice), body).await;
    assert!(matches!(
        resp.parse::<CommentRecord>(),
        Err(ApiError::InvalidBody(_))
    ));

    // the auth check comes before looking at the body
    let resp = raw_request(&mut t.app, "POST", &uri, None, b"{not json".to_vec()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rate_limiting_comes_first() {
    let mut t = TestApp::new(2);
    let (_, alice) = t.user("alice").await;
    let post = t.post(alice).await;
    let uri = format!("/api/posts/{}/comments", post.0);

    let stranger = format!("bearer {}", Uuid::new_v4());
    let from_stranger = ([10, 0, 0, 1], 1234);
    for _ in 0..2 {
        let resp = raw_request_from(
            &mut t.app,
            from_stranger,
            "POST",
            &uri,
            Some(&stranger),
            b"{not json".to_vec(),
        )
        .await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    }
    let resp = raw_request_from(
        &mut t.app,
        from_stranger,
        "POST",
        &uri,
        Some(&stranger),
        b"{not json".to_vec(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers.contains_key(http::header::RETRY_AFTER));
    match resp.parse::<()>() {
        Err(ApiError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs >= 1 && retry_after_secs <= 60)
        }
        r => panic!("unexpected result {r:?}"),
    }

    // alice used one write creating the post, and her token is limited whatever her address
    let alice_auth = format!("bearer {alice}");
    let body = serde_json::to_vec(&NewComment::new(None, String::from("hi"))).unwrap();
    let resp = raw_request_from(
        &mut t.app,
        ([10, 0, 0, 2], 1234),
        "POST",
        &uri,
        Some(&alice_auth),
        body.clone(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let resp = raw_request_from(
        &mut t.app,
        ([10, 0, 0, 3], 1234),
        "POST",
        &uri,
        Some(&alice_auth),
        body,
    )
    .await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);

    // reads are not limited, even from the address that used up its writes
    assert_eq!(t.fetch(Some(alice), post).await.comments.len(), 1);
}

#[tokio::test]
async fn changing_credentials_does_not_reset_the_limit() {
    let mut t = TestApp::new(3);
    let (_, alice) = t.user("alice").await;
    let post = t.post(alice).await;
    let uri = format!("/api/posts/{}/comments", post.0);
    let attacker = ([10, 0, 0, 66], 1234);

    let mut statuses = Vec::new();
    for i in 0..10 {
        let auth = match i % 3 {
            0 => Some(format!("bearer {}", Uuid::new_v4())),
            1 => Some(format!("garbage-{i}")),
            _ => None,
        };
        let resp = raw_request_from(
            &mut t.app,
            attacker,
            "POST",
            &uri,
            auth.as_deref(),
            b"{}".to_vec(),
        )
        .await;
        statuses.push(resp.status);
    }
    assert_eq!(&statuses[..3], &[StatusCode::UNAUTHORIZED; 3]);
    assert_eq!(&statuses[3..], &[StatusCode::TOO_MANY_REQUESTS; 7]);

    // other addresses are not affected
    let resp = raw_request_from(
        &mut t.app,
        ([10, 0, 0, 67], 1234),
        "POST",
        &uri,
        None,
        b"{}".to_vec(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_attempts_are_limited() {
    let mut t = TestApp::with_limits(1000, 2);
    t.user("alice").await;
    let attacker = ([10, 0, 0, 66], 1234);

    let guess = |i: usize| {
        serde_json::to_vec(&NewSession {
            user: String::from("alice"),
            password: format!("guess {i}"),
            device: String::from("test"),
        })
        .unwrap()
    };
    let mut statuses = Vec::new();
    for i in 0..20 {
        let auth = format!("garbage-{i}");
        let resp = raw_request_from(
            &mut t.app,
            attacker,
            "POST",
            "/api/auth",
            Some(&auth),
            guess(i),
        )
        .await;
        statuses.push(resp.status);
    }
    assert_eq!(&statuses[..2], &[StatusCode::FORBIDDEN; 2]);
    assert_eq!(&statuses[2..], &[StatusCode::TOO_MANY_REQUESTS; 18]);

    // alice logged in once from her own address, and still can
    let session = NewSession {
        user: String::from("alice"),
        password: String::from("password"),
        device: String::from("test"),
    };
    let token: Result<AuthToken, _> =
        run_on_app(&mut t.app, "POST", "/api/auth", None, &session).await;
    assert!(token.is_ok());
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Comment {
        user: usize,
        parent: Option<usize>,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
    },
    Edit {
        user: usize,
        comment: usize,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
    },
    Delete {
        user: usize,
        comment: usize,
    },
    Fetch {
        user: Option<usize>,
    },
}

/// What the server should hold, checked after every operation
struct Expected {
    id: CommentId,
    author: usize,
    content: String,
    deleted: bool,
}

do_tokio_test!(fuzz_comment_ops, Vec<FuzzOp>, |ops: Vec<FuzzOp>| async move {
    let mut t = TestApp::new(u32::MAX);
    let users = [t.user("alice").await.1, t.user("bob").await.1];
    let post = t.post(users[0]).await;
    let mut model = Vec::<Expected>::new();

    for op in ops {
        match op {
            FuzzOp::Comment {
                user,
                parent,
                content,
            } => {
                let user = resize_int(user, ..users.len()).unwrap();
                let parent = parent.and_then(|p| resize_int(p, ..model.len()));
                let res = t
                    .comment(
                        Some(users[user]),
                        post,
                        parent.map(|p| model[p].id),
                        &content,
                    )
                    .await;
                let expected = arbor_api::checked(NewComment::new(None, content.clone()));
                match (res, expected) {
                    (Ok(c), Ok(checked)) => {
                        assert!(parent.map(|p| !model[p].deleted).unwrap_or(true));
                        assert_eq!(c.content, checked.content);
                        model.push(Expected {
                            id: c.id,
                            author: user,
                            content: c.content,
                            deleted: false,
                        });
                    }
                    (Err(e), Err(expected)) => assert_eq!(e, expected),
                    (Err(ApiError::CommentNotFound(id)), Ok(_)) => {
                        let p = parent.expect("comment not found without a parent");
                        assert_eq!(id, model[p].id);
                        assert!(model[p].deleted);
                    }
                    (res, expected) => panic!("got {res:?}, expected {expected:?}"),
                }
            }
            FuzzOp::Edit {
                user,
                comment,
                content,
            } => {
                let user = resize_int(user, ..users.len()).unwrap();
                let comment = match resize_int(comment, ..model.len()) {
                    Some(c) => c,
                    None => continue,
                };
                let target = &mut model[comment];
                let res: Result<CommentRecord, _> = run_on_app(
                    &mut t.app,
                    "PATCH",
                    &format!("/api/comments/{}", target.id.0),
                    Some(users[user]),
                    &EditComment {
                        content: content.clone(),
                    },
                )
                .await;
                match arbor_api::checked(EditComment { content }) {
                    Err(e) => assert_eq!(res.map(|_| ()), Err(e)),
                    Ok(_) if target.deleted => {
                        assert_eq!(res.map(|_| ()), Err(ApiError::CommentNotFound(target.id)))
                    }
                    Ok(_) if target.author != user => {
                        assert_eq!(res.map(|_| ()), Err(ApiError::PermissionDenied))
                    }
                    Ok(checked) => {
                        let c = res.expect("author edit failed");
                        assert_eq!(c.content, checked.content);
                        target.content = c.content;
                    }
                }
            }
            FuzzOp::Delete { user, comment } => {
                let user = resize_int(user, ..users.len()).unwrap();
                let comment = match resize_int(comment, ..model.len()) {
                    Some(c) => c,
                    None => continue,
                };
                let target = &mut model[comment];
                let res: Result<(), _> = run_on_app(
                    &mut t.app,
                    "DELETE",
                    &format!("/api/comments/{}", target.id.0),
                    Some(users[user]),
                    &(),
                )
                .await;
                if target.deleted {
                    assert_eq!(res, Err(ApiError::CommentNotFound(target.id)));
                } else if target.author != user {
                    assert_eq!(res, Err(ApiError::PermissionDenied));
                } else {
                    assert_eq!(res, Ok(()));
                    target.deleted = true;
                }
            }
            FuzzOp::Fetch { user } => {
                let token = user.and_then(|u| resize_int(u, ..users.len()).map(|u| users[u]));
                let fetched = t.fetch(token, post).await;
                assert_eq!(fetched.comments.len(), model.len());
                for (got, expected) in fetched.comments.iter().zip(model.iter()) {
                    assert_eq!(got.id, expected.id);
                    assert_eq!(got.is_deleted(), expected.deleted);
                    if expected.deleted {
                        assert!(got.content.is_empty());
                    } else {
                        assert_eq!(got.content, expected.content);
                    }
                }
            }
        }
    }
});
