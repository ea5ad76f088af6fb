//! Engine configuration.
//!
//! Every value can come from the environment; terminal credentials fall
//! back to the OS credential store, and an API key given as a connection
//! string fills in the URL and terminal id it carries.

use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::api::{normalize_admin_url, ConnectionString};
use crate::error::ConfigError;
use crate::storage;

pub const DEFAULT_CHANNEL: &str = "walk-in";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_ADMIN_URL: &str = "POS_ADMIN_URL";
pub const ENV_API_KEY: &str = "POS_API_KEY";
pub const ENV_TERMINAL_ID: &str = "POS_TERMINAL_ID";
pub const ENV_CHANNEL: &str = "POS_ORDER_CHANNEL";
pub const ENV_POLL_INTERVAL_MS: &str = "POS_POLL_INTERVAL_MS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "POS_AUTO_ADVANCE_LOCK_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "POS_REQUEST_TIMEOUT_MS";

#[derive(Clone)]
pub struct EngineConfig {
    pub admin_url: String,
    pub api_key: Zeroizing<String>,
    pub terminal_id: Option<String>,
    /// Channel discriminator sent with order numbers and new orders.
    pub channel: String,
    pub poll_interval: Duration,
    /// Age after which an in-flight transition lock is treated as abandoned.
    pub lock_timeout: Duration,
    pub request_timeout: Duration,
}

impl EngineConfig {
    pub fn new(admin_url: &str, api_key: &str) -> Self {
        Self {
            admin_url: normalize_admin_url(admin_url),
            api_key: Zeroizing::new(api_key.trim().to_string()),
            terminal_id: None,
            channel: DEFAULT_CHANNEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Resolve from process environment, then the OS credential store.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(|key| std::env::var(key).ok(), storage::get_credential)
    }

    /// Resolve from an environment lookup and a credential-store lookup.
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        credentials: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let raw_api_key = env(ENV_API_KEY)
            .or_else(|| credentials(storage::KEY_API_KEY))
            .ok_or(ConfigError::Missing(ENV_API_KEY))?;
        let decoded = ConnectionString::parse(&raw_api_key).unwrap_or_default();
        let api_key = decoded
            .api_key
            .clone()
            .unwrap_or_else(|| raw_api_key.trim().to_string());

        let admin_url = env(ENV_ADMIN_URL)
            .or_else(|| credentials(storage::KEY_ADMIN_URL))
            .or(decoded.admin_url)
            .map(|u| normalize_admin_url(&u))
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing(ENV_ADMIN_URL))?;

        let terminal_id = env(ENV_TERMINAL_ID)
            .or_else(|| credentials(storage::KEY_TERMINAL_ID))
            .or(decoded.terminal_id);

        let mut config = Self::new(&admin_url, &api_key);
        config.terminal_id = terminal_id;
        if let Some(channel) = env(ENV_CHANNEL) {
            config.channel = channel.to_lowercase();
        }
        config.poll_interval = duration_ms(env(ENV_POLL_INTERVAL_MS), DEFAULT_POLL_INTERVAL);
        config.lock_timeout = duration_ms(env(ENV_LOCK_TIMEOUT_MS), DEFAULT_LOCK_TIMEOUT);
        config.request_timeout =
            duration_ms(env(ENV_REQUEST_TIMEOUT_MS), DEFAULT_REQUEST_TIMEOUT);
        Ok(config)
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("admin_url", &self.admin_url)
            .field("api_key", &"<redacted>")
            .field("terminal_id", &self.terminal_id)
            .field("channel", &self.channel)
            .field("poll_interval", &self.poll_interval)
            .field("lock_timeout", &self.lock_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Milliseconds from a setting; zero or unparsable falls back.
fn duration_ms(raw: Option<String>, fallback: Duration) -> Duration {
    raw.and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}
