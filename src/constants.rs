//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change the default collector, only edit this file.

/// Default collector URL
///
/// This is the fallback URL when no environment variable is set.
/// For development: http://127.0.0.1:8080
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

/// Events per delivery batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Debounce interval before a partial batch is flushed (milliseconds)
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 5_000;

/// Upper bound on the debounce timer regardless of configuration
pub const MAX_DEBOUNCE_MS: u64 = 5_000;

/// Buffered events kept before the oldest are evicted
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_000;

/// Total delivery attempts per batch
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Linear retry step (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Hard timeout per network attempt (milliseconds)
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;

/// Local backup budget in serialized bytes (5 MB)
pub const DEFAULT_MAX_LOCAL_STORAGE_SIZE: usize = 5 * 1024 * 1024;

/// Share of backup entries evicted when the budget is exceeded
pub const BACKUP_EVICTION_FRACTION: f64 = 0.2;

/// Dead-letter entries kept before the oldest is discarded
pub const DEAD_LETTER_CAPACITY: usize = 100;

/// Marker written in place of sensitive values
pub const REDACTED: &str = "[REDACTED]";

/// Storage key for backed-up batches
pub const BACKUP_STORAGE_KEY: &str = "pending_batches";

/// Storage key for the persisted statistics snapshot
pub const STATS_STORAGE_KEY: &str = "statistics";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "sentinel-relay";

/// Default User-Agent sent in every payload
pub fn default_user_agent() -> String {
    format!("{}/{}", APP_NAME, APP_VERSION)
}
