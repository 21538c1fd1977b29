//! Normalized Events
//!
//! What the buffer stores and the delivery subsystem ships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// ROUTE
// ============================================================================

/// Logical destination of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    NetworkLog,
    Security,
    Extension,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::NetworkLog => "network_log",
            Route::Security => "security",
            Route::Extension => "extension",
        }
    }

    /// Collector path for this route
    pub fn path(&self) -> &'static str {
        match self {
            Route::NetworkLog => "/api/logs",
            Route::Security => "/api/security",
            Route::Extension => "/api/extensions",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// NORMALIZED EVENT
// ============================================================================

/// Sanitized, routed event
///
/// `payload` holds a network log entry for `NetworkLog`, and
/// `{"event_type", "data"}` for the other routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub route: Route,
    pub payload: Map<String, Value>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn new(
        route: Route,
        payload: Map<String, Value>,
        session_id: &str,
        client_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            route,
            payload,
            session_id: session_id.to_string(),
            client_id: client_id.map(str::to_string),
            timestamp,
        }
    }

    /// Build a `{"event_type", "data"}` event
    pub fn typed(
        route: Route,
        event_type: &str,
        data: Value,
        session_id: &str,
        client_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("event_type".into(), Value::String(event_type.to_string()));
        payload.insert("data".into(), data);
        Self::new(route, payload, session_id, client_id, timestamp)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.payload.get("event_type").and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Serialized size, used for `bytes_logged`
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
