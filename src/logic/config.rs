//! Relay Configuration
//!
//! Recognized options, defaults, environment overrides and a shared handle
//! that notifies subscribers whenever an option changes at runtime.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::constants;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Relay configuration (JSON field names are camelCase)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Events per delivery batch; reaching it triggers an immediate flush
    pub batch_size: usize,
    /// Debounce interval for partial batches (ms), capped at 5s
    pub batch_interval: u64,
    /// Buffered events kept before FIFO eviction
    pub max_buffer_size: usize,
    /// Total delivery attempts per batch
    pub max_retries: u32,
    /// Linear retry step (ms)
    pub retry_delay: u64,
    /// Hard timeout per network attempt (ms)
    pub fetch_timeout_ms: u64,
    /// Local backup budget (serialized bytes)
    pub max_local_storage_size: usize,
    /// Report network activity to /api/logs
    pub enable_report_urls: bool,
    /// Report script loads to /api/extensions
    pub enable_js_execution: bool,
    /// Report clipboard/console detections to /api/security
    pub enable_clickfix: bool,
    /// Gzip request bodies
    pub enable_compression: bool,
    /// Hosts whose network activity is never reported
    pub domain_whitelist: Vec<String>,
    /// Collector base URL
    pub server_url: String,
    /// Optional stable client identifier
    pub client_id: Option<String>,
    /// User-Agent echoed in every payload
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_BATCH_SIZE,
            batch_interval: constants::DEFAULT_BATCH_INTERVAL_MS,
            max_buffer_size: constants::DEFAULT_MAX_BUFFER_SIZE,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay: constants::DEFAULT_RETRY_DELAY_MS,
            fetch_timeout_ms: constants::DEFAULT_FETCH_TIMEOUT_MS,
            max_local_storage_size: constants::DEFAULT_MAX_LOCAL_STORAGE_SIZE,
            enable_report_urls: true,
            enable_js_execution: true,
            enable_clickfix: true,
            enable_compression: false,
            domain_whitelist: Vec::new(),
            server_url: constants::DEFAULT_SERVER_URL.to_string(),
            client_id: None,
            user_agent: constants::default_user_agent(),
        }
    }
}

impl Config {
    /// Defaults with `SENTINEL_*` environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Read a JSON config file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&data)?;
        Ok(config.normalized())
    }

    /// Apply environment overrides on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }
        fn flag(name: &str) -> Option<bool> {
            std::env::var(name)
                .ok()
                .map(|s| s.to_lowercase() != "false" && s != "0")
        }

        if let Ok(url) = std::env::var("SENTINEL_SERVER_URL") {
            self.server_url = url;
        }
        if let Ok(id) = std::env::var("SENTINEL_CLIENT_ID") {
            self.client_id = Some(id).filter(|s| !s.is_empty());
        }
        if let Ok(ua) = std::env::var("SENTINEL_USER_AGENT") {
            self.user_agent = ua;
        }
        if let Some(v) = parsed("SENTINEL_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = parsed("SENTINEL_BATCH_INTERVAL_MS") {
            self.batch_interval = v;
        }
        if let Some(v) = parsed("SENTINEL_MAX_BUFFER_SIZE") {
            self.max_buffer_size = v;
        }
        if let Some(v) = parsed("SENTINEL_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = parsed("SENTINEL_RETRY_DELAY_MS") {
            self.retry_delay = v;
        }
        if let Some(v) = parsed("SENTINEL_FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = v;
        }
        if let Some(v) = parsed("SENTINEL_MAX_LOCAL_STORAGE_SIZE") {
            self.max_local_storage_size = v;
        }
        if let Some(v) = flag("SENTINEL_ENABLE_REPORT_URLS") {
            self.enable_report_urls = v;
        }
        if let Some(v) = flag("SENTINEL_ENABLE_JS_EXECUTION") {
            self.enable_js_execution = v;
        }
        if let Some(v) = flag("SENTINEL_ENABLE_CLICKFIX") {
            self.enable_clickfix = v;
        }
        if let Some(v) = flag("SENTINEL_ENABLE_COMPRESSION") {
            self.enable_compression = v;
        }
        if let Ok(list) = std::env::var("SENTINEL_DOMAIN_WHITELIST") {
            self.domain_whitelist = list
                .split(',')
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }

        self.normalized()
    }

    /// Clamp values that would stall the pipeline
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.max_buffer_size = self.max_buffer_size.max(1);
        self.max_retries = self.max_retries.max(1);
        self.server_url = self.server_url.trim_end_matches('/').to_string();
        self
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval)
    }

    /// Debounce delay, bounded so suspended hosts still flush promptly
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval.min(constants::MAX_DEBOUNCE_MS))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Full URL for a collector path such as `/api/logs`
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }
}

// ============================================================================
// SHARED HANDLE
// ============================================================================

type ChangeCallback = Arc<dyn Fn(&Config, &Config) + Send + Sync>;

/// Shared, runtime-updatable configuration
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Config>>,
    callbacks: Arc<Mutex<Vec<ChangeCallback>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(config.normalized())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy of the current options
    pub fn snapshot(&self) -> Config {
        self.current.read().clone()
    }

    /// Register a callback invoked with `(old, new)` after every change
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&Config, &Config) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Arc::new(callback));
    }

    /// Mutate options in place; subscribers are notified if anything changed
    pub fn update<F: FnOnce(&mut Config)>(&self, mutate: F) {
        let (old, new) = {
            let mut guard = self.current.write();
            let old = guard.clone();
            let mut next = old.clone();
            mutate(&mut next);
            *guard = next.normalized();
            (old, guard.clone())
        };

        if old != new {
            self.notify(&old, &new);
        }
    }

    /// Replace every option at once
    pub fn replace(&self, config: Config) {
        self.update(|c| *c = config);
    }

    fn notify(&self, old: &Config, new: &Config) {
        // Callbacks run outside both locks so they may read or register freely
        let callbacks: Vec<ChangeCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(old, new);
        }
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("current", &*self.current.read())
            .field("callbacks", &self.callbacks.lock().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
