//! Gateway layer: session resolution and rate limiting.
//!
//! Both run as middleware or helpers in front of the API handlers; neither
//! owns any routes.

pub mod auth;
pub mod rate_limit;

pub use auth::{AuthenticatedUser, CurrentUser, MaybeSession, SessionVerifier};
pub use rate_limit::{
    FixedWindowLimiter, RateLimitBackend, RateLimitDecision, RedisWindowLimiter, client_identifier,
};
