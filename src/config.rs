//! Environment configuration.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ask_api::AskApiConfig;
use history_store::default_history_path;
use tracing::warn;

pub const ENV_BASE_URL: &str = "BACKEND_URL";
pub const ENV_AUTH_TOKEN: &str = "BACKEND_AUTH_TOKEN";
pub const ENV_API_KEY: &str = "BACKEND_API_KEY";
pub const ENV_TIMEOUT_MS: &str = "BACKEND_TIMEOUT_MS";
pub const ENV_HISTORY_PATH: &str = "ASK_HISTORY_PATH";

/// Settings read from the process environment. Blank values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub history_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string_opt(ENV_BASE_URL),
            auth_token: env_string_opt(ENV_AUTH_TOKEN),
            api_key: env_string_opt(ENV_API_KEY),
            timeout_ms: env_u64_opt(ENV_TIMEOUT_MS),
            history_path: env_string_opt(ENV_HISTORY_PATH).map(PathBuf::from),
        }
    }

    /// Transport settings; unset values keep the [`AskApiConfig`] defaults.
    /// A zero timeout disables both the header and the idle timeout.
    pub fn api_config(&self) -> AskApiConfig {
        let mut config = AskApiConfig::default();
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(token) = &self.auth_token {
            config = config.with_auth_token(token.clone());
        }
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key.clone());
        }
        match self.timeout_ms {
            Some(0) => config.without_timeout(),
            Some(ms) => config.with_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }

    pub fn history_path_or_default(&self, cwd: &Path) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| default_history_path(cwd))
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_owned())
        }
    })
}

fn env_u64_opt(key: &str) -> Option<u64> {
    let value = env_string_opt(key)?;
    match value.parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn!(key, value = %value, %error, "ignoring non-numeric environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const ALL_KEYS: [&str; 5] = [
        ENV_BASE_URL,
        ENV_AUTH_TOKEN,
        ENV_API_KEY,
        ENV_TIMEOUT_MS,
        ENV_HISTORY_PATH,
    ];

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        ALL_KEYS
            .into_iter()
            .map(|key| set_env_guard(key, None))
            .collect()
    }

    #[test]
    fn env_defaults_match_api_defaults() {
        let _lock = env_lock();
        let _guards = clear_all();

        let config = EnvConfig::from_env();
        assert_eq!(config, EnvConfig::default());
        assert_eq!(config.api_config(), AskApiConfig::default());
        assert_eq!(
            config.history_path_or_default(Path::new("/work")),
            PathBuf::from("/work/.ask/history.json")
        );
    }

    #[test]
    fn env_values_flow_into_api_config() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard(ENV_BASE_URL, Some("https://ask.example.com"));
        let _g2 = set_env_guard(ENV_AUTH_TOKEN, Some(" tok "));
        let _g3 = set_env_guard(ENV_API_KEY, Some("key"));
        let _g4 = set_env_guard(ENV_TIMEOUT_MS, Some("1500"));
        let _g5 = set_env_guard(ENV_HISTORY_PATH, Some("/tmp/ask.json"));

        let config = EnvConfig::from_env();
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(
            config.history_path_or_default(Path::new("/work")),
            PathBuf::from("/tmp/ask.json")
        );

        let api = config.api_config();
        assert_eq!(api.base_url, "https://ask.example.com");
        assert_eq!(api.auth_token.as_deref(), Some("tok"));
        assert_eq!(api.api_key.as_deref(), Some("key"));
        assert_eq!(api.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn blank_values_are_ignored() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard(ENV_BASE_URL, Some("   "));
        let _g2 = set_env_guard(ENV_AUTH_TOKEN, Some(""));

        let config = EnvConfig::from_env();
        assert!(config.base_url.is_none());
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn timeout_parsing() {
        let _lock = env_lock();
        let _guards = clear_all();

        let _g = set_env_guard(ENV_TIMEOUT_MS, Some("soon"));
        assert_eq!(EnvConfig::from_env().timeout_ms, None);

        let _g = set_env_guard(ENV_TIMEOUT_MS, Some("0"));
        assert_eq!(EnvConfig::from_env().api_config().timeout, None);
    }
}
