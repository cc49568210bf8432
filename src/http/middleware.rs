//! Rate limiting middleware for axum routers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::ratelimit::{Identity, RateLimiter, Verdict};
use crate::store::CounterStore;

/// Header carrying the client's access token.
pub const TOKEN_HEADER: &str = "api_key";

/// Header carrying the proxy chain of client addresses.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Body returned when an identity is already locked out.
pub const BLOCKED_MESSAGE: &str =
    "You have reached the maximum number of requests allowed within a certain time frame (Is Blocked)";

/// Body returned when a request starts a lockout.
pub const LIMIT_EXCEEDED_MESSAGE: &str =
    "You have reached the maximum number of requests allowed within a certain time frame (Became Blocked)";

const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Derive the identity of an incoming request from its headers and peer
/// address.
pub fn request_identity(request: &Request) -> Identity {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let headers = request.headers();
    Identity::derive(
        header(headers, TOKEN_HEADER),
        header(headers, FORWARDED_FOR_HEADER),
        &remote_addr,
    )
}

/// Admit or reject a request based on the limiter's verdict.
///
/// Allowed requests go to the inner service. Policy denials become 429 with a
/// message telling the two kinds apart; store failures become 500.
pub async fn rate_limit<S>(
    State(limiter): State<Arc<RateLimiter<S>>>,
    request: Request,
    next: Next,
) -> Response
where
    S: CounterStore + 'static,
{
    let identity = request_identity(&request);

    match limiter.decide(&identity).await {
        Ok(Verdict::Allow) => next.run(request).await,
        Ok(Verdict::Blocked) => {
            debug!(identity = %identity, "Rejecting locked out identity");
            (StatusCode::TOO_MANY_REQUESTS, BLOCKED_MESSAGE).into_response()
        }
        Ok(Verdict::LimitExceeded) => {
            debug!(identity = %identity, "Rejecting request over limit");
            (StatusCode::TOO_MANY_REQUESTS, LIMIT_EXCEEDED_MESSAGE).into_response()
        }
        Err(e) => {
            error!(identity = %identity, error = %e, "Rate limit decision failed");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE).into_response()
        }
    }
}
