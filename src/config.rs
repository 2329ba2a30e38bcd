use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{NotifyError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub ws_url: Option<String>,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub per_page: u32,
    pub poll_fresh_items: u32,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: Option<u32>,
    pub toast_duration: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> std::result::Result<Self, env::VarError> {
        Ok(Config {
            api_base_url: env::var("FOODTRACK_API_URL")
                .unwrap_or_else(|_| "http://localhost:5252/api".to_string()),
            ws_url: env::var("FOODTRACK_WS_URL").ok(),
            sync: SyncConfig {
                per_page: env_parse("NOTIFICATIONS_PER_PAGE", 20),
                poll_fresh_items: env_parse("NOTIFICATIONS_POLL_FRESH", 5),
                poll_interval: Duration::from_secs(env_parse(
                    "NOTIFICATIONS_POLL_INTERVAL_SECS",
                    15,
                )),
                heartbeat_interval: Duration::from_secs(env_parse(
                    "NOTIFICATIONS_HEARTBEAT_SECS",
                    20,
                )),
                reconnect_base: Duration::from_millis(env_parse(
                    "NOTIFICATIONS_RECONNECT_BASE_MS",
                    1000,
                )),
                reconnect_cap: Duration::from_millis(env_parse(
                    "NOTIFICATIONS_RECONNECT_CAP_MS",
                    30000,
                )),
                max_reconnect_attempts: env::var("NOTIFICATIONS_MAX_RECONNECT_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.trim().parse().ok()),
                toast_duration: Duration::from_secs(env_parse("NOTIFICATIONS_TOAST_SECS", 5)),
                request_timeout: Duration::from_secs(env_parse(
                    "NOTIFICATIONS_REQUEST_TIMEOUT_SECS",
                    10,
                )),
            },
        })
    }

    /// Push endpoint: the explicit override, or the REST base with its scheme
    /// switched to ws/wss and the `/api` suffix replaced by `/ws/notifications`.
    pub fn ws_endpoint(&self) -> Result<Url> {
        if let Some(ws_url) = &self.ws_url {
            return Ok(Url::parse(ws_url)?);
        }

        let mut url = Url::parse(&self.api_base_url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(NotifyError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| NotifyError::UnsupportedScheme(scheme.to_string()))?;

        let base_path = url.path().trim_end_matches('/');
        let base_path = base_path.strip_suffix("/api").unwrap_or(base_path).to_string();
        url.set_path(&format!("{}/ws/notifications", base_path));
        url.set_query(None);
        Ok(url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5252/api".to_string(),
            ws_url: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            per_page: 20,
            poll_fresh_items: 5,
            poll_interval: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(20),
            reconnect_base: Duration::from_millis(1000),
            reconnect_cap: Duration::from_millis(30000),
            max_reconnect_attempts: None,
            toast_duration: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
