//! Limiting rules and the registry mapping action names to them.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TurnstileError};

/// A fixed-window rule: at most `max_requests` per `window_size_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitRule {
    /// Length of each window, in seconds
    pub window_size_secs: u64,
    /// Requests admitted per identifier per window
    pub max_requests: u64,
}

impl LimitRule {
    pub const fn new(window_size_secs: u64, max_requests: u64) -> Self {
        Self {
            window_size_secs,
            max_requests,
        }
    }

    /// Reject rules that could never admit anything or would divide by zero.
    pub fn validate(&self, action: &str) -> Result<()> {
        let reason = if self.window_size_secs == 0 {
            "window_size_secs must be positive"
        } else if self.max_requests == 0 {
            "max_requests must be positive"
        } else {
            return Ok(());
        };
        Err(TurnstileError::InvalidLimit {
            action: action.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Window length as a `Duration`; also the ttl of each window's counter.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_size_secs)
    }

    /// Index of the window containing `now` (time since the Unix epoch).
    pub fn window_index(&self, now: Duration) -> u64 {
        now.as_secs() / self.window_size_secs
    }
}

/// Action name -> rule table.
///
/// Normally filled once at startup. Reads take a shared lock and copy the
/// rule out, so a concurrent `insert` is seen either entirely or not at all.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    rules: RwLock<HashMap<String, LimitRule>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the rule for `action`.
    pub fn insert(&self, action: &str, rule: LimitRule) -> Result<()> {
        rule.validate(action)?;
        let previous = self.rules.write().insert(action.to_string(), rule);
        debug!(
            action,
            window_size_secs = rule.window_size_secs,
            max_requests = rule.max_requests,
            replaced = previous.is_some(),
            "Registered rate limit"
        );
        Ok(())
    }

    pub fn get(&self, action: &str) -> Option<LimitRule> {
        self.rules.read().get(action).copied()
    }

    /// Sorted copy of every registered rule.
    pub fn snapshot(&self) -> BTreeMap<String, LimitRule> {
        self.rules
            .read()
            .iter()
            .map(|(action, rule)| (action.clone(), *rule))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
