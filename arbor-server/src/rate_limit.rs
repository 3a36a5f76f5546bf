use std::{
    cmp,
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use arbor_api::{AuthToken, Error as ApiError};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;

use crate::{extractors::bearer_token, Error};

/// Most client keys tracked at once; new clients are refused while the table is full
const MAX_TRACKED_KEYS: usize = 4096;

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Requests allowed per window
    pub burst: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window request counter, per client key
#[derive(Clone, Debug)]
pub struct RateLimiter {
    limits: Limits,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

fn rate_limited(left: Duration) -> ApiError {
    let retry_after_secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
    ApiError::RateLimited {
        retry_after_secs: cmp::max(retry_after_secs, 1),
    }
}

impl RateLimiter {
    pub fn new(limits: Limits) -> RateLimiter {
        RateLimiter {
            limits,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn check(&self, keys: &[String]) -> Result<(), ApiError> {
        self.check_at(keys, Instant::now())
    }

    /// Counts one request against each of `keys` at `now`
    ///
    /// The request is refused, and counted against none of them, if any key's window is
    /// already full.
    pub fn check_at(&self, keys: &[String], now: Instant) -> Result<(), ApiError> {
        let window = self.limits.window;
        let finished = |w: &Window| now.saturating_duration_since(w.start) >= window;
        let mut windows = self.windows.lock();

        let new_keys = |windows: &HashMap<String, Window>| {
            keys.iter().filter(|k| !windows.contains_key(*k)).count()
        };
        if windows.len() + new_keys(&*windows) > MAX_TRACKED_KEYS {
            windows.retain(|_, w| !finished(&*w));
            if windows.len() + new_keys(&*windows) > MAX_TRACKED_KEYS {
                let oldest = windows.values().map(|w| w.start).min().unwrap_or(now);
                tracing::warn!(tracked = windows.len(), "rate limiter table is full");
                return Err(rate_limited(
                    window.saturating_sub(now.saturating_duration_since(oldest)),
                ));
            }
        }

        let full = keys
            .iter()
            .filter_map(|k| windows.get(k))
            .filter(|&w| !finished(w) && w.count >= self.limits.burst)
            .map(|w| window.saturating_sub(now.saturating_duration_since(w.start)))
            .max();
        if let Some(left) = full {
            return Err(rate_limited(left));
        }

        for k in keys {
            let w = windows.entry(k.clone()).or_insert(Window {
                start: now,
                count: 0,
            });
            if finished(&*w) {
                w.start = now;
                w.count = 0;
            }
            w.count += 1;
        }
        Ok(())
    }
}

/// The limiters guarding the two kinds of rate-limited routes
#[derive(Clone, Debug)]
pub struct RateLimits {
    /// Every mutating route but login
    pub writes: RateLimiter,
    pub logins: RateLimiter,
}

fn peer_key(req: &Request<Body>) -> String {
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => String::from("ip:unknown"),
    }
}

/// Every request counts against its peer address, and also against its bearer token if
/// it carries a well-formed one
///
/// The token is not checked against the store here: limiting happens before
/// authentication, and the peer limit bounds how many made-up tokens get tracked.
async fn limit(
    limiter: &RateLimiter,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, Error> {
    let peer = peer_key(&req);
    let mut keys = vec![peer.clone()];
    if let Ok(AuthToken(token)) = bearer_token(req.headers()) {
        keys.push(format!("token:{token}"));
    }
    if let Err(e) = limiter.check(&keys) {
        tracing::info!(%peer, uri = %req.uri(), "rate limited request");
        return Err(Error::from(e));
    }
    Ok(next.run(req).await)
}

pub async fn limit_writes(
    State(limits): State<RateLimits>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, Error> {
    limit(&limits.writes, req, next).await
}

pub async fn limit_logins(
    State(limits): State<RateLimits>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, Error> {
    limit(&limits.logins, req, next).await
}
