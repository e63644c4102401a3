//! Rate limiter trait used by request handlers.

use async_trait::async_trait;
use tracing::debug;

use super::rules::LimitRule;
use crate::error::{Result, TurnstileError};

/// Admission decisions for named actions.
///
/// Handlers hold a `dyn RateLimiter` so they do not depend on the counting
/// algorithm or the store behind it.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Register or replace the rule for `action`.
    fn set_limit(&self, action: &str, rule: LimitRule) -> Result<()>;

    /// `Ok(true)` if every identifier may perform `action` now, `Ok(false)`
    /// if one is over its limit. Store failures are `Err`, never a decision.
    async fn check(&self, identifiers: &[&str], action: &str) -> Result<bool>;

    /// Release the counter store.
    async fn close(&self) -> Result<()>;
}

/// Run a check and turn a denial into [`TurnstileError::RateLimited`].
pub async fn ensure_rate_limit(
    limiter: &dyn RateLimiter,
    identifiers: &[&str],
    action: &str,
) -> Result<()> {
    if limiter.check(identifiers, action).await? {
        Ok(())
    } else {
        debug!(action, "Rejecting request: rate limit exceeded");
        Err(TurnstileError::RateLimited {
            action: action.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    /// Limiter whose every check fails with a closed store.
    struct BrokenLimiter;

    #[async_trait]
    impl RateLimiter for BrokenLimiter {
        fn set_limit(&self, _action: &str, _rule: LimitRule) -> Result<()> {
            Ok(())
        }

        async fn check(&self, _identifiers: &[&str], _action: &str) -> Result<bool> {
            Err(StoreError::Closed.into())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_store_errors_are_not_reported_as_rate_limited() {
        let err = tokio_test::block_on(ensure_rate_limit(&BrokenLimiter, &["a"], "login"))
            .unwrap_err();
        assert!(matches!(err, TurnstileError::Store(StoreError::Closed)));
    }
}
