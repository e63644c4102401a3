//! Fixed-window rate limiter.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::backend::RateLimiter;
use super::key::CounterKey;
use super::rules::{ActionRegistry, LimitRule};
use crate::clock::{Clock, SystemClock};
use crate::config::{TurnstileConfig, UnknownActionPolicy};
use crate::error::Result;
use crate::store::CounterStore;

/// Fixed-window rate limiter over a [`CounterStore`].
///
/// Time is cut into windows of `window_size_secs`; each (identifier, action,
/// window) triple gets its own counter that expires with the window. The
/// limiter keeps no per-call state of its own, so it can be shared freely
/// across tasks.
pub struct FixedWindowRateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    registry: ActionRegistry,
    unknown_actions: UnknownActionPolicy,
}

impl FixedWindowRateLimiter {
    /// Create a limiter using the system clock and no registered rules.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    /// Create a limiter whose windows follow `clock`.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            registry: ActionRegistry::new(),
            unknown_actions: UnknownActionPolicy::default(),
        }
    }

    /// Set how actions without a rule are treated.
    pub fn with_unknown_action_policy(mut self, policy: UnknownActionPolicy) -> Self {
        self.unknown_actions = policy;
        self
    }

    /// Build a limiter with every rule and policy from `config` installed.
    pub fn from_config(
        config: &TurnstileConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let limiter =
            Self::with_clock(store, clock).with_unknown_action_policy(config.unknown_actions);
        for (action, rule) in &config.limits {
            limiter.set_limit(action, *rule)?;
        }
        Ok(limiter)
    }

    /// Register or replace the rule for `action`. Invalid rules are rejected.
    pub fn set_limit(&self, action: &str, rule: LimitRule) -> Result<()> {
        self.registry.insert(action, rule)
    }

    /// The rule registered for `action`, if any.
    pub fn limit(&self, action: &str) -> Option<LimitRule> {
        self.registry.get(action)
    }

    /// Every registered rule, sorted by action name.
    pub fn limits(&self) -> BTreeMap<String, LimitRule> {
        self.registry.snapshot()
    }

    pub fn unknown_action_policy(&self) -> UnknownActionPolicy {
        self.unknown_actions
    }

    /// Decide whether every identifier may perform `action` now.
    ///
    /// Identifiers are counted in order and the first one over its limit
    /// ends the call with `Ok(false)`. Identifiers before it have already
    /// spent a slot; identifiers after it are not counted at all.
    pub async fn check<S>(&self, identifiers: &[S], action: &str) -> Result<bool>
    where
        S: AsRef<str> + Sync,
    {
        let Some(rule) = self.registry.get(action) else {
            return Ok(match self.unknown_actions {
                UnknownActionPolicy::Allow => {
                    trace!(action, "No rate limit registered, admitting");
                    true
                }
                UnknownActionPolicy::Deny => {
                    warn!(action, "No rate limit registered, denying");
                    false
                }
            });
        };

        // One reading of the clock so every identifier lands in the same window.
        let window = rule.window_index(self.clock.now());

        for identifier in identifiers {
            let key = CounterKey::new(identifier.as_ref(), action, window);
            let count = self
                .store
                .increment_with_ttl(&key.to_string(), rule.window())
                .await?;

            trace!(
                key = %key,
                count,
                limit = rule.max_requests,
                "Checked fixed-window counter"
            );

            if u64::try_from(count).map_or(false, |count| count > rule.max_requests) {
                debug!(
                    key = %key,
                    count,
                    limit = rule.max_requests,
                    "Rate limit exceeded"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Shorthand for checking a single identifier.
    pub async fn check_one(&self, identifier: &str, action: &str) -> Result<bool> {
        self.check(&[identifier], action).await
    }

    /// Close the underlying counter store.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for FixedWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowRateLimiter")
            .field("registry", &self.registry)
            .field("clock", &self.clock)
            .field("unknown_actions", &self.unknown_actions)
            .finish()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    fn set_limit(&self, action: &str, rule: LimitRule) -> Result<()> {
        FixedWindowRateLimiter::set_limit(self, action, rule)
    }

    async fn check(&self, identifiers: &[&str], action: &str) -> Result<bool> {
        FixedWindowRateLimiter::check(self, identifiers, action).await
    }

    async fn close(&self) -> Result<()> {
        FixedWindowRateLimiter::close(self).await
    }
}
