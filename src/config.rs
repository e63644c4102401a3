//! Configuration management for Turnstile.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::LimitRule;

/// Prefix for environment overrides, e.g. `TURNSTILE__STORE__BACKEND=redis`.
const ENV_PREFIX: &str = "TURNSTILE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for a Turnstile deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Counter store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// What to do with actions that have no registered rule
    #[serde(default)]
    pub unknown_actions: UnknownActionPolicy,

    /// Action name -> limiting rule
    #[serde(default = "default_limits")]
    pub limits: BTreeMap<String, LimitRule>,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            unknown_actions: UnknownActionPolicy::default(),
            limits: default_limits(),
        }
    }
}

/// The action table the service has always shipped with.
fn default_limits() -> BTreeMap<String, LimitRule> {
    [
        ("default", 60, 100),
        ("checkCredentials", 300, 10),
        ("createUser", 3600, 3),
        ("createReview", 1200, 4),
        ("createComment", 240, 4),
        ("sendMail", 3600, 3),
    ]
    .into_iter()
    .map(|(action, window_size_secs, max_requests)| {
        (
            action.to_string(),
            LimitRule {
                window_size_secs,
                max_requests,
            },
        )
    })
    .collect()
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Counters live in this process only.
    #[default]
    Memory,
    /// Counters live in Redis and are shared by every process.
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL, used by the Redis backend only
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Decision for an action with no registered rule.
///
/// `Allow` fails open: a misspelled action name silently goes unthrottled.
/// `Deny` fails closed and rejects every call for such an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownActionPolicy {
    #[default]
    Allow,
    Deny,
}

impl TurnstileConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, then apply `TURNSTILE__*`
    /// environment overrides on top.
    ///
    /// Only `store.*` and `unknown_actions` can be overridden. The `limits`
    /// table always comes from the file (or the built-in defaults) so action
    /// names keep their exact case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let overrides: EnvOverrides = ::config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        overrides.apply(&mut config);
        Ok(config)
    }
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
}

/// Settings that may be replaced from the environment.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    #[serde(default)]
    store: StoreOverrides,
    unknown_actions: Option<UnknownActionPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreOverrides {
    backend: Option<StoreBackend>,
    redis_url: Option<String>,
}

impl EnvOverrides {
    fn apply(self, config: &mut TurnstileConfig) {
        if let Some(backend) = self.store.backend {
            config.store.backend = backend;
        }
        if let Some(redis_url) = self.store.redis_url {
            config.store.redis_url = redis_url;
        }
        if let Some(policy) = self.unknown_actions {
            config.unknown_actions = policy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TurnstileConfig::default();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.unknown_actions, UnknownActionPolicy::Allow);
        assert_eq!(config.limits.len(), 6);
        assert_eq!(
            config.limits["createUser"],
            LimitRule {
                window_size_secs: 3600,
                max_requests: 3
            }
        );
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
store:
  backend: redis
  redis_url: redis://cache.internal:6380
unknown_actions: deny
limits:
  login:
    window_size_secs: 300
    max_requests: 10
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://cache.internal:6380");
        assert_eq!(config.unknown_actions, UnknownActionPolicy::Deny);
        assert_eq!(config.limits.len(), 1);
        assert_eq!(config.limits["login"].max_requests, 10);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = TurnstileConfig::from_yaml("store:\n  backend: memory\n").unwrap();

        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.limits.len(), 6);
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let result = TurnstileConfig::from_yaml("store:\n  backend: memcached\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = TurnstileConfig::from_file("/nonexistent/turnstile.yaml");
        assert!(matches!(result, Err(TurnstileError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnstile-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "unknown_actions: deny\nlimits:\n  upload:\n    window_size_secs: 10\n    max_requests: 2\n",
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.unknown_actions, UnknownActionPolicy::Deny);
        assert_eq!(config.limits["upload"].window_size_secs, 10);
    }

    fn env_with(vars: &[(&str, &str)]) -> ::config::Environment {
        let vars: ::config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_source().source(Some(vars))
    }

    fn shipped_config_path() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("config/turnstile.yaml")
    }

    #[test]
    fn test_load_shipped_config_keeps_action_case() {
        let path = shipped_config_path();
        let config = TurnstileConfig::load_with_env(Some(&path), env_with(&[])).unwrap();

        assert_eq!(config.limits, default_limits());
        assert_eq!(config.limits["createUser"], LimitRule::new(3600, 3));
        assert!(!config.limits.contains_key("createuser"));
    }

    #[test]
    fn test_load_applies_environment_overrides() {
        let path = shipped_config_path();
        let env = env_with(&[
            ("TURNSTILE__STORE__BACKEND", "redis"),
            ("TURNSTILE__STORE__REDIS_URL", "redis://cache:6379"),
            ("TURNSTILE__UNKNOWN_ACTIONS", "deny"),
        ]);

        let config = TurnstileConfig::load_with_env(Some(&path), env).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://cache:6379");
        assert_eq!(config.unknown_actions, UnknownActionPolicy::Deny);
        assert_eq!(config.limits["checkCredentials"], LimitRule::new(300, 10));
        assert_eq!(config.limits["sendMail"], LimitRule::new(3600, 3));
    }

    #[test]
    fn test_load_without_file_uses_defaults_and_overrides() {
        let env = env_with(&[("TURNSTILE__STORE__BACKEND", "redis")]);

        let config = TurnstileConfig::load_with_env(None, env).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.limits, default_limits());
    }

    #[test]
    fn test_load_rejects_bad_override() {
        let env = env_with(&[("TURNSTILE__STORE__BACKEND", "memcached")]);

        let result = TurnstileConfig::load_with_env(None, env);
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }
}
