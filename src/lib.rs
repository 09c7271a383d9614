//! SelfSync - project download service with request rate limiting
//!
//! This crate implements an in-process, fixed-window rate limiter keyed by
//! client and endpoint, together with the HTTP routes that enforce its
//! verdicts and let an administrator reset windows.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
