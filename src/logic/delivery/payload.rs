//! Collector wire payloads
//!
//! Field names and optionality follow the collector's request types
//! exactly; `client_id` and `block_reason` are omitted when absent.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::DeliveryError;
use crate::logic::config::Config;
use crate::logic::events::{NormalizedEvent, Route};

/// ISO-8601 UTC with millisecond precision, e.g. `2024-03-01T12:00:00.000Z`
pub fn wire_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Body of `POST /api/logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    pub user_agent: String,
    pub logs: Vec<NetworkLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkLog {
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(rename = "type", default = "default_request_type")]
    pub request_type: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

fn default_request_type() -> String {
    "other".to_string()
}

/// Body of `POST /api/security` and `POST /api/extensions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    pub user_agent: String,
    pub event_type: String,
    pub data: Value,
}

// ============================================================================
// DELIVERY UNITS
// ============================================================================

/// One HTTP request's worth of events
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUnit {
    pub route: Route,
    pub events: Vec<NormalizedEvent>,
}

/// Fully encoded request ready for a transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub gzip: bool,
}

/// Split events into send units: network logs sharing a session merge into
/// one `/api/logs` request, every other event is sent on its own.
pub fn plan_units(events: &[NormalizedEvent]) -> Vec<DeliveryUnit> {
    let mut log_units: Vec<DeliveryUnit> = Vec::new();
    let mut single_units = Vec::new();

    for event in events {
        match event.route {
            Route::NetworkLog => {
                let existing = log_units.iter_mut().find(|u| {
                    u.events[0].session_id == event.session_id
                        && u.events[0].client_id == event.client_id
                });
                match existing {
                    Some(unit) => unit.events.push(event.clone()),
                    None => log_units.push(DeliveryUnit {
                        route: Route::NetworkLog,
                        events: vec![event.clone()],
                    }),
                }
            }
            route => single_units.push(DeliveryUnit {
                route,
                events: vec![event.clone()],
            }),
        }
    }

    log_units.extend(single_units);
    log_units
}

impl DeliveryUnit {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialize the wire body; `now` stamps `/api/logs` payloads
    pub fn body(&self, user_agent: &str, now: DateTime<Utc>) -> Result<Vec<u8>, DeliveryError> {
        let first = self
            .events
            .first()
            .ok_or_else(|| DeliveryError::Serialization("empty delivery unit".into()))?;

        match self.route {
            Route::NetworkLog => {
                let logs = self
                    .events
                    .iter()
                    .map(|e| serde_json::from_value::<NetworkLog>(Value::Object(e.payload.clone())))
                    .collect::<Result<Vec<_>, _>>()?;
                let payload = LogsPayload {
                    client_id: first.client_id.clone(),
                    session_id: first.session_id.clone(),
                    timestamp: wire_timestamp(now),
                    user_agent: user_agent.to_string(),
                    logs,
                };
                Ok(serde_json::to_vec(&payload)?)
            }
            Route::Security | Route::Extension => {
                let event_type = first
                    .event_type()
                    .ok_or_else(|| DeliveryError::Serialization("event without event_type".into()))?;
                let payload = EventPayload {
                    client_id: first.client_id.clone(),
                    session_id: first.session_id.clone(),
                    timestamp: wire_timestamp(first.timestamp),
                    user_agent: user_agent.to_string(),
                    event_type: event_type.to_string(),
                    data: first.data().cloned().unwrap_or(Value::Null),
                };
                Ok(serde_json::to_vec(&payload)?)
            }
        }
    }

    /// Build the request for this unit under the given config
    pub fn to_request(&self, config: &Config, now: DateTime<Utc>) -> Result<OutboundRequest, DeliveryError> {
        let body = self.body(&config.user_agent, now)?;
        let body = if config.enable_compression {
            gzip(&body)?
        } else {
            body
        };

        Ok(OutboundRequest {
            url: config.endpoint_url(self.route.path()),
            body,
            gzip: config.enable_compression,
        })
    }
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
