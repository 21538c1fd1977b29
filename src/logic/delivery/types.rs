//! Delivery result and error types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::events::NormalizedEvent;

/// One failed send attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to encode payload: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DeliveryError {
    fn from(e: serde_json::Error) -> Self {
        DeliveryError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(e: std::io::Error) -> Self {
        DeliveryError::Serialization(e.to_string())
    }
}

/// How a batch left the deliverer
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Every unit reached the collector
    Delivered { units: usize, attempts: u32 },
    /// Some units succeeded; the rest were dead-lettered as one entry
    Partial { delivered: usize, dead_lettered: usize },
    /// Nothing got through; the whole batch was dead-lettered
    DeadLettered { events: usize, last_error: DeliveryError },
    /// Empty batch, nothing sent
    Empty,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. } | DeliveryOutcome::Empty)
    }
}

/// Events whose retries were exhausted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Backup key of the originating batch
    pub batch_id: Uuid,
    pub events: Vec<NormalizedEvent>,
    /// Send attempts made so far, including drains
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}
