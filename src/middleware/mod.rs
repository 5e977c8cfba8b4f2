//! Middleware components for HTTP request processing.
//!
//! Cross-cutting request handling: caller identification, rate limiting,
//! request validation and response hardening.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use rate_limit::EndpointRateLimiter;
