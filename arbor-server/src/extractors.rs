use arbor_api::{AuthToken, Sanitize, UserId, Uuid, Validate};
use arbor_store::SharedStore;
use axum::{
    async_trait,
    body::HttpBody,
    extract::{FromRequest, FromRequestParts},
    http::{self, request, Request},
    BoxError, Json,
};
use serde::de::DeserializeOwned;

use crate::{rate_limit::RateLimits, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub store: SharedStore,
    pub admin_token: Option<AuthToken>,
    pub limits: RateLimits,
}

/// Parses an `Authorization: Bearer <token>` header, without checking the token
pub fn bearer_token(headers: &http::HeaderMap) -> Result<AuthToken, Error> {
    let auth = headers
        .get(http::header::AUTHORIZATION)
        .ok_or_else(Error::unauthenticated)?;
    let auth = auth.to_str().map_err(|_| Error::unauthenticated())?;
    let mut auth = auth.split(' ');
    if !auth
        .next()
        .ok_or_else(Error::unauthenticated)?
        .eq_ignore_ascii_case("bearer")
    {
        return Err(Error::unauthenticated());
    }
    let token = auth.next().ok_or_else(Error::unauthenticated)?;
    if auth.next().is_some() {
        return Err(Error::unauthenticated());
    }
    let token = Uuid::try_from(token).map_err(|_| Error::unauthenticated())?;
    Ok(AuthToken(token))
}

/// Bearer token of the request, not checked against the store yet
pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        bearer_token(&req.headers).map(PreAuth)
    }
}

/// A request from a logged-in user
pub struct Auth {
    pub user: UserId,
    pub token: AuthToken,
}

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let user = state.store.lock().await.whoami(token)?;
        Ok(Auth { user, token })
    }
}

/// Like `Auth`, but anonymous requests go through as None
///
/// A request that does carry credentials still fails if they are invalid.
pub struct MaybeAuth(pub Option<AuthToken>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<MaybeAuth, Error> {
        if !req.headers.contains_key(http::header::AUTHORIZATION) {
            return Ok(MaybeAuth(None));
        }
        let auth = Auth::from_request_parts(req, state).await?;
        Ok(MaybeAuth(Some(auth.token)))
    }
}

pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<AdminAuth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        if Some(token) == state.admin_token {
            Ok(AdminAuth)
        } else {
            Err(Error::permission_denied())
        }
    }
}

/// A JSON body, rejected with the API's own error format if it does not parse
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for ApiJson<T>
where
    T: DeserializeOwned,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<ApiJson<T>, Error> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(body)) => Ok(ApiJson(body)),
            Err(rejection) => Err(Error::invalid_body(rejection.body_text())),
        }
    }
}

/// A JSON body that passed validation, then sanitization
pub struct Checked<T>(pub T);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for Checked<T>
where
    T: DeserializeOwned + Validate + Sanitize,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Checked<T>, Error> {
        let ApiJson(body) = ApiJson::<T>::from_request(req, state).await?;
        Ok(Checked(arbor_api::checked(body)?))
    }
}
