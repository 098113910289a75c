//! Rate limiting middleware, grounded on the teacher's
//! `middleware::rate_limit::RateLimit` (per-user / per-IP keyed limits with a
//! configurable window), generalized to key off bearer-token claims instead
//! of a session extension and backed by `governor`'s GCRA limiter instead of
//! a hand-rolled fixed-window counter.

use crate::auth::VerifyToken;
use crate::error::ApiError;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

fn quota_for(rpm: u32, window_secs: u64) -> Quota {
    let rpm = rpm.max(1);
    let period = Duration::from_secs_f64(window_secs as f64 / f64::from(rpm));
    let burst = NonZeroU32::new(rpm).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period).map_or_else(|| Quota::per_second(burst), |q| q.allow_burst(burst))
}

/// Enforces `rate_limit_per_user_rpm` for authenticated callers and
/// `rate_limit_per_ip_rpm` for everyone, both over `rate_limit_window_secs`.
#[derive(Clone)]
pub struct RateLimit {
    per_user: Arc<KeyedLimiter>,
    per_ip: Arc<KeyedLimiter>,
    verifier: VerifyToken,
}

impl RateLimit {
    #[must_use]
    pub fn new(
        per_user_rpm: u32,
        per_ip_rpm: u32,
        window_secs: u64,
        verifier: VerifyToken,
    ) -> Self {
        Self {
            per_user: Arc::new(RateLimiter::keyed(quota_for(per_user_rpm, window_secs))),
            per_ip: Arc::new(RateLimiter::keyed(quota_for(per_ip_rpm, window_secs))),
            verifier,
        }
    }

    fn caller_user_id(&self, request: &Request) -> Option<String> {
        let header = request.headers().get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
        let token = header.strip_prefix("Bearer ")?;
        self.verifier.verify(token).ok().map(|claims| claims.sub)
    }

    /// Axum middleware entry point: `axum::middleware::from_fn_with_state`.
    ///
    /// # Errors
    /// Returns [`ApiError::RateLimited`] once a caller exceeds their quota.
    pub async fn middleware(
        State(rate_limit): State<Self>,
        ConnectInfo(addr): ConnectInfo<SocketAddr>,
        request: Request,
        next: Next,
    ) -> Result<Response, ApiError> {
        if let Some(user_id) = rate_limit.caller_user_id(&request) {
            if rate_limit.per_user.check_key(&user_id).is_err() {
                warn!(%user_id, "per-user rate limit exceeded");
                return Err(ApiError::RateLimited);
            }
            debug!(%user_id, "per-user rate limit check passed");
        } else {
            let ip = addr.ip().to_string();
            if rate_limit.per_ip.check_key(&ip).is_err() {
                warn!(%ip, "per-ip rate limit exceeded");
                return Err(ApiError::RateLimited);
            }
            debug!(%ip, "per-ip rate limit check passed");
        }

        Ok(next.run(request).await)
    }
}
