use arbor_api::Error as ApiError;
use axum::http::{header, HeaderValue};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(#[from] pub ApiError);

impl Error {
    pub fn permission_denied() -> Error {
        Error(ApiError::PermissionDenied)
    }

    pub fn unauthenticated() -> Error {
        Error(ApiError::Unauthenticated)
    }

    pub fn invalid_body(reason: String) -> Error {
        Error(ApiError::InvalidBody(reason))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self.0 {
            ApiError::Unknown(err) => {
                tracing::error!(%err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err}"));
                err
            }
            err => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        let mut resp = (
            err.status_code(),
            [(header::CONTENT_TYPE, "application/json")],
            err.contents(),
        )
            .into_response();
        if let ApiError::RateLimited { retry_after_secs } = err {
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        resp
    }
}
