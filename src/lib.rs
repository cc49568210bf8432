//! Gatekeep - HTTP admission control
//!
//! This crate decides, per incoming HTTP request, whether to forward it
//! upstream or reject it. Requests are rate limited by source address or by
//! presented access token, with a fixed counting window and a lockout once the
//! limit is reached. Counters live in an external store so that several
//! instances can share them.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
