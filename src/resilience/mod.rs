//! Resilience primitives for outbound workspace traffic.

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterSnapshot};
