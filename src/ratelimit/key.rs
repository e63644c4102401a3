//! Counter key generation.

use std::fmt;

/// Identifies one counter: an identifier's use of an action during one window.
///
/// Rendered as `identifier:action:window`. Requests for the same pair in the
/// same window share a key; every new window gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The throttled entity (client address, account id, ...)
    pub identifier: String,
    /// The action name
    pub action: String,
    /// Window index, `floor(now / window_size_secs)`
    pub window: u64,
}

impl CounterKey {
    pub fn new(identifier: &str, action: &str, window: u64) -> Self {
        Self {
            identifier: identifier.to_string(),
            action: action.to_string(),
            window,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.identifier, self.action, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_format() {
        let key = CounterKey::new("1.2.3.4", "createUser", 472_222);
        assert_eq!(key.to_string(), "1.2.3.4:createUser:472222");
    }

    #[test]
    fn test_counter_key_changes_with_window() {
        let a = CounterKey::new("user:42", "sendMail", 7);
        let b = CounterKey::new("user:42", "sendMail", 8);

        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a, CounterKey::new("user:42", "sendMail", 7));
    }
}
