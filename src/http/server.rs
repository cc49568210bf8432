//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::rate_limit;
use crate::error::Result;
use crate::ratelimit::RateLimiter;
use crate::store::CounterStore;

/// HTTP server that puts the rate limiter in front of an upstream router.
pub struct HttpServer<S: CounterStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter<S>>,
    /// Routes served to admitted requests
    upstream: Router,
}

impl<S: CounterStore + 'static> HttpServer<S> {
    /// Create a new HTTP server guarding `upstream`.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter<S>>, upstream: Router) -> Self {
        Self {
            addr,
            rate_limiter,
            upstream,
        }
    }

    /// The upstream router wrapped in the rate limiting and tracing layers.
    pub fn router(&self) -> Router {
        self.upstream
            .clone()
            .layer(axum::middleware::from_fn_with_state(
                self.rate_limiter.clone(),
                rate_limit::<S>,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::http::FORWARDED_FOR_HEADER;
    use crate::ratelimit::{LimitPolicies, LimitPolicy};
    use crate::store::MemoryStore;

    fn server() -> HttpServer<MemoryStore> {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LimitPolicies::new(
                LimitPolicy::new(1, 10, 10),
                LimitPolicy::new(2, 5, 5),
            )),
        ));
        HttpServer::new(addr, rate_limiter, Router::new().route("/", get(|| async { "ok" })))
    }

    #[tokio::test]
    async fn test_router_applies_rate_limit() {
        let router = server().router();

        let request = || {
            Request::builder()
                .uri("/")
                .header(FORWARDED_FOR_HEADER, "192.168.1.1")
                .body(Body::empty())
                .unwrap()
        };

        let response = router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let server = server();
        let result = server.serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }
}
