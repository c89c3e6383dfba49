//! Runtime configuration: TOML file + environment overrides, precedence
//! environment > file > compiled-in defaults. Every field has a default,
//! so a config-file-free cold start is always possible.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::RetryPolicy;
use serde::Deserialize;

fn default_port() -> u16 {
    8080
}
fn default_client_id() -> String {
    anthropic_auth::ANTHROPIC_CLIENT_ID.to_string()
}
fn default_session_duration_ms() -> i64 {
    18_000_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_retry_backoff() -> f64 {
    2.0
}
fn default_db_retry_attempts() -> u32 {
    3
}
fn default_db_retry_delay_ms() -> u64 {
    100
}
fn default_db_retry_backoff() -> f64 {
    2.0
}
fn default_db_retry_max_delay_ms() -> u64 {
    5_000
}
fn default_lb_strategy() -> String {
    "session".to_string()
}
fn default_db_path() -> String {
    "gateway.db".to_string()
}
fn default_upstream_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_upstream_connect_timeout_secs() -> u64 {
    30
}
fn default_upstream_header_timeout_secs() -> u64 {
    60
}
fn default_upstream_body_idle_timeout_secs() -> u64 {
    300
}
fn default_oauth_timeout_secs() -> u64 {
    10
}
fn default_shutdown_drain_secs() -> u64 {
    10
}
fn default_client_cancel_drain_secs() -> u64 {
    2
}
fn default_request_log_capacity() -> usize {
    500
}
fn default_tee_buffer_capacity() -> usize {
    64
}

/// Gateway configuration. Every field recognized by spec.md §6
/// (`port`, `client_id`, `session_duration_ms`, `retry_attempts`,
/// `retry_delay_ms`, `retry_backoff`, `db_retry_*`, `lb_strategy`) plus
/// the ambient fields a working binary needs (storage path, body size
/// cap, timeouts, shutdown drain deadline) that the distilled spec left
/// as "configuration, not prose."
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_session_duration_ms")]
    pub session_duration_ms: i64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_db_retry_attempts")]
    pub db_retry_attempts: u32,
    #[serde(default = "default_db_retry_delay_ms")]
    pub db_retry_delay_ms: u64,
    #[serde(default = "default_db_retry_backoff")]
    pub db_retry_backoff: f64,
    #[serde(default = "default_db_retry_max_delay_ms")]
    pub db_retry_max_delay_ms: u64,
    #[serde(default = "default_lb_strategy")]
    pub lb_strategy: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_upstream_connect_timeout_secs")]
    pub upstream_connect_timeout_secs: u64,
    #[serde(default = "default_upstream_header_timeout_secs")]
    pub upstream_header_timeout_secs: u64,
    #[serde(default = "default_upstream_body_idle_timeout_secs")]
    pub upstream_body_idle_timeout_secs: u64,
    #[serde(default = "default_oauth_timeout_secs")]
    pub oauth_timeout_secs: u64,
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
    #[serde(default = "default_client_cancel_drain_secs")]
    pub client_cancel_drain_secs: u64,
    #[serde(default = "default_request_log_capacity")]
    pub request_log_capacity: usize,
    #[serde(default = "default_tee_buffer_capacity")]
    pub tee_buffer_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            client_id: default_client_id(),
            session_duration_ms: default_session_duration_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff: default_retry_backoff(),
            db_retry_attempts: default_db_retry_attempts(),
            db_retry_delay_ms: default_db_retry_delay_ms(),
            db_retry_backoff: default_db_retry_backoff(),
            db_retry_max_delay_ms: default_db_retry_max_delay_ms(),
            lb_strategy: default_lb_strategy(),
            db_path: default_db_path(),
            upstream_base_url: default_upstream_base_url(),
            max_body_bytes: default_max_body_bytes(),
            upstream_connect_timeout_secs: default_upstream_connect_timeout_secs(),
            upstream_header_timeout_secs: default_upstream_header_timeout_secs(),
            upstream_body_idle_timeout_secs: default_upstream_body_idle_timeout_secs(),
            oauth_timeout_secs: default_oauth_timeout_secs(),
            shutdown_drain_secs: default_shutdown_drain_secs(),
            client_cancel_drain_secs: default_client_cancel_drain_secs(),
            request_log_capacity: default_request_log_capacity(),
            tee_buffer_capacity: default_tee_buffer_capacity(),
        }
    }
}

impl Config {
    /// Resolves the config file path: `--config` flag, else
    /// `GATEWAY_CONFIG_PATH`, else `./config.toml`.
    pub fn resolve_path(cli_arg: Option<&str>) -> PathBuf {
        if let Some(path) = cli_arg {
            return PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GATEWAY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from("./config.toml")
    }

    /// Loads configuration from `path` if it exists (falling back to
    /// compiled-in defaults otherwise), then applies environment
    /// overrides.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_PORT") {
            match v.parse() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!(value = %v, error = %e, "invalid GATEWAY_PORT, ignoring"),
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_SESSION_DURATION_MS") {
            match v.parse() {
                Ok(ms) => self.session_duration_ms = ms,
                Err(e) => tracing::warn!(value = %v, error = %e, "invalid GATEWAY_SESSION_DURATION_MS, ignoring"),
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_DB_PATH") {
            self.db_path = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_LB_STRATEGY") {
            if v == "session" {
                self.lb_strategy = v;
            } else {
                tracing::warn!(strategy = %v, "unsupported lb_strategy, keeping \"session\"");
            }
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Retry policy for the outer request path (spec.md §4.1's default:
    /// 100ms / base 2 / 5s cap / 3 attempts, overridable via config).
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_delay_ms),
            self.retry_backoff,
            Duration::from_secs(5),
            self.retry_attempts,
        )
    }

    /// Retry policy passed to `AccountStore::open` for storage writes.
    pub fn db_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.db_retry_delay_ms),
            self.db_retry_backoff,
            Duration::from_millis(self.db_retry_max_delay_ms),
            self.db_retry_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.session_duration_ms, 18_000_000);
        assert_eq!(config.lb_strategy, "session");
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/gateway-config.toml")).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn load_parses_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 9090\nlb_strategy = \"session\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.session_duration_ms, 18_000_000);
    }

    #[test]
    fn resolve_path_prefers_cli_arg() {
        let path = Config::resolve_path(Some("/tmp/explicit.toml"));
        assert_eq!(path, PathBuf::from("/tmp/explicit.toml"));
    }
}
