//! Fixed-window rate limiting over a pluggable counter store.

mod backend;
mod key;
mod limiter;
mod rules;

pub use backend::{ensure_rate_limit, RateLimiter};
pub use key::CounterKey;
pub use limiter::FixedWindowRateLimiter;
pub use rules::{ActionRegistry, LimitRule};
