use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use arbor_api::{AuthToken, Uuid};
use arbor_store::{SharedStore, Store};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};

mod error;
mod extractors;
mod fuzz;
mod handlers;
mod rate_limit;

pub use error::Error;
use extractors::AppState;
use rate_limit::{Limits, RateLimiter, RateLimits};

/// Largest accepted request body: a comment with an inline image, plus some slack
const MAX_BODY_BYTES: usize = arbor_api::MAX_IMAGE_URL_LEN + 64 * 1024;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(long, env = "ARBOR_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Token allowed to create users
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,

    /// Mutating requests allowed per client and window
    #[structopt(long, default_value = "30")]
    write_burst: u32,

    #[structopt(long, default_value = "60")]
    write_window_secs: u64,

    /// Login attempts allowed per client and window
    #[structopt(long, default_value = "5")]
    auth_burst: u32,

    #[structopt(long, default_value = "60")]
    auth_window_secs: u64,

    #[structopt(long, default_value = "12")]
    bcrypt_cost: u32,
}

impl Opt {
    fn limits(&self) -> RateLimits {
        RateLimits {
            writes: RateLimiter::new(Limits {
                burst: self.write_burst,
                window: Duration::from_secs(self.write_window_secs),
            }),
            logins: RateLimiter::new(Limits {
                burst: self.auth_burst,
                window: Duration::from_secs(self.auth_window_secs),
            }),
        }
    }
}

/// Every mutating route goes through, in order: rate limiting, the auth check, then body
/// validation and sanitization by the `Checked` extractor.
pub fn app(state: AppState) -> Router {
    let writes = Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/friends/:user", post(handlers::add_friend))
        .route("/api/forests", post(handlers::create_forest))
        .route("/api/posts", post(handlers::create_post))
        .route("/api/posts/:post/comments", post(handlers::create_comment))
        .route(
            "/api/comments/:comment",
            patch(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_writes,
        ));
    let logins = Router::new()
        .route("/api/auth", post(handlers::auth))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_logins,
        ));
    let reads = Router::new()
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/users", get(handlers::fetch_users))
        .route("/api/posts/:post", get(handlers::fetch_post));

    Router::new()
        .merge(writes)
        .merge(logins)
        .merge(reads)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    if opt.admin_token.is_none() {
        tracing::warn!("no admin token configured, users cannot be created");
    }

    let state = AppState {
        store: SharedStore::new(Store::with_bcrypt_cost(opt.bcrypt_cost)),
        admin_token: opt.admin_token.map(AuthToken),
        limits: opt.limits(),
    };
    let app = app(state);

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving axum webserver")
}
