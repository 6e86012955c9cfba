use std::env;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_RECONNECT_MS: u64 = 5_000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SUCCESS_TOKEN: &str = "ok";

/// Tunables shared by both channel variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Delay between push subscription reconnect attempts.
    pub reconnect_interval: Duration,
    /// Body a smoke-signal room returns for an accepted message post.
    pub success_token: String,
    /// Per-request timeout for outbound posts.
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_MS),
            success_token: DEFAULT_SUCCESS_TOKEN.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
        }
    }
}

impl ChannelConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let success_token = env::var("BEACH_FLARE_SUCCESS_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .unwrap_or(defaults.success_token);
        Self {
            reconnect_interval: millis_from_env(
                "BEACH_FLARE_RECONNECT_MS",
                defaults.reconnect_interval,
            ),
            success_token,
            request_timeout: millis_from_env(
                "BEACH_FLARE_HTTP_TIMEOUT_MS",
                defaults.request_timeout,
            ),
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_success_token(mut self, token: impl Into<String>) -> Self {
        self.success_token = token.into();
        self
    }
}

fn millis_from_env(var: &str, fallback: Duration) -> Duration {
    match env::var(var) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                warn!(target = "signaling", var, value = %raw, "ignoring invalid duration");
                fallback
            }
        },
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variables are process-global; serialize the tests touching them.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 3] = [
        "BEACH_FLARE_RECONNECT_MS",
        "BEACH_FLARE_SUCCESS_TOKEN",
        "BEACH_FLARE_HTTP_TIMEOUT_MS",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_room_servers() {
        let config = ChannelConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.success_token, "ok");
    }

    #[test]
    fn from_env_without_vars_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        assert_eq!(ChannelConfig::from_env(), ChannelConfig::default());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        env::set_var("BEACH_FLARE_RECONNECT_MS", "250");
        env::set_var("BEACH_FLARE_SUCCESS_TOKEN", "SUCCESS");
        env::set_var("BEACH_FLARE_HTTP_TIMEOUT_MS", "not-a-number");

        let config = ChannelConfig::from_env();
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.success_token, "SUCCESS");
        assert_eq!(
            config.request_timeout,
            Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS)
        );
        clear_vars();
    }
}
