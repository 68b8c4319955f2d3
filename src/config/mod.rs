use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::transport::backoff::ReconnectPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub websocket: WebSocketConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub permissions_path: String,
    /// `{id}` is replaced with the group id
    pub group_permissions_path: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub url: String,
    pub heartbeat_interval_secs: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub auth_rejected_close_code: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub refresh_debounce_ms: u64,
    pub cache_stale_secs: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

impl SyncConfig {
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn cache_stale_time(&self) -> Duration {
        Duration::from_secs(self.cache_stale_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: 3000,
            cache_stale_secs: 5 * 60,
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/permissions/".to_string(),
            heartbeat_interval_secs: 30,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 5,
            auth_rejected_close_code: 4001,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // API overrides
        if let Ok(v) = env::var("PERMSYNC_API_URL") {
            self.api.base_url = v;
        }
        if let Ok(v) = env::var("PERMSYNC_PERMISSIONS_PATH") {
            self.api.permissions_path = v;
        }
        if let Ok(v) = env::var("PERMSYNC_GROUP_PERMISSIONS_PATH") {
            self.api.group_permissions_path = v;
        }
        if let Ok(v) = env::var("PERMSYNC_REQUEST_TIMEOUT_SECS") {
            self.api.request_timeout_secs = v.parse().unwrap_or(self.api.request_timeout_secs);
        }

        // WebSocket overrides
        if let Ok(v) = env::var("PERMSYNC_WS_URL") {
            self.websocket.url = v;
        }
        if let Ok(v) = env::var("PERMSYNC_HEARTBEAT_SECS") {
            self.websocket.heartbeat_interval_secs = v.parse().unwrap_or(self.websocket.heartbeat_interval_secs);
        }
        if let Ok(v) = env::var("PERMSYNC_RECONNECT_INITIAL_MS") {
            self.websocket.reconnect_initial_delay_ms = v.parse().unwrap_or(self.websocket.reconnect_initial_delay_ms);
        }
        if let Ok(v) = env::var("PERMSYNC_RECONNECT_MAX_MS") {
            self.websocket.reconnect_max_delay_ms = v.parse().unwrap_or(self.websocket.reconnect_max_delay_ms);
        }
        if let Ok(v) = env::var("PERMSYNC_RECONNECT_MAX_ATTEMPTS") {
            self.websocket.reconnect_max_attempts = v.parse().unwrap_or(self.websocket.reconnect_max_attempts);
        }
        if let Ok(v) = env::var("PERMSYNC_AUTH_REJECTED_CODE") {
            self.websocket.auth_rejected_close_code = v.parse().unwrap_or(self.websocket.auth_rejected_close_code);
        }

        // Sync overrides
        if let Ok(v) = env::var("PERMSYNC_REFRESH_DEBOUNCE_MS") {
            self.sync.refresh_debounce_ms = v.parse().unwrap_or(self.sync.refresh_debounce_ms);
        }
        if let Ok(v) = env::var("PERMSYNC_CACHE_STALE_SECS") {
            self.sync.cache_stale_secs = v.parse().unwrap_or(self.sync.cache_stale_secs);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig {
                base_url: "http://localhost:8000".to_string(),
                permissions_path: "/api/users/me/permissions/".to_string(),
                group_permissions_path: "/api/groups/{id}/permissions/".to_string(),
                request_timeout_secs: 30,
            },
            websocket: WebSocketConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            api: ApiConfig {
                base_url: "https://api.staging.example.com".to_string(),
                permissions_path: "/api/users/me/permissions/".to_string(),
                group_permissions_path: "/api/groups/{id}/permissions/".to_string(),
                request_timeout_secs: 15,
            },
            websocket: WebSocketConfig {
                url: "wss://api.staging.example.com/ws/permissions/".to_string(),
                ..WebSocketConfig::default()
            },
            sync: SyncConfig::default(),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            api: ApiConfig {
                base_url: "https://api.example.com".to_string(),
                permissions_path: "/api/users/me/permissions/".to_string(),
                group_permissions_path: "/api/groups/{id}/permissions/".to_string(),
                request_timeout_secs: 10,
            },
            websocket: WebSocketConfig {
                url: "wss://api.example.com/ws/permissions/".to_string(),
                ..WebSocketConfig::default()
            },
            sync: SyncConfig::default(),
        }
    }
}

// Process-wide config - initialized once on first access
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
