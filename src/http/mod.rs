//! HTTP boundary: the rate limiting middleware and the server that runs it.

mod middleware;
mod server;

pub use middleware::{
    rate_limit, request_identity, BLOCKED_MESSAGE, FORWARDED_FOR_HEADER, LIMIT_EXCEEDED_MESSAGE,
    TOKEN_HEADER,
};
pub use server::HttpServer;
