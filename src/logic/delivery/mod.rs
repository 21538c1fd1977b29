//! Delivery Module
//!
//! Ships delivery batches to the collector.
//!
//! ## Structure
//! - `types`: DeliveryError, DeliveryOutcome, DeadLetterEntry
//! - `payload`: wire payloads, unit planning, gzip
//! - `transport`: Transport trait + reqwest implementation
//! - `retry`: linear retry policy
//! - `dead_letter`: bounded dead-letter queue
//! - `deliverer`: backup, retry loop, dead-lettering and drain

pub mod types;
pub mod payload;
pub mod transport;
pub mod retry;
pub mod dead_letter;
pub mod deliverer;

#[cfg(test)]
pub(crate) mod testing;

pub use types::{DeadLetterEntry, DeliveryError, DeliveryOutcome};
pub use payload::{plan_units, wire_timestamp, DeliveryUnit, EventPayload, LogsPayload, NetworkLog, OutboundRequest};
pub use transport::{HttpTransport, Transport};
pub use retry::{RetryPolicy, RetryRecord};
pub use dead_letter::DeadLetterQueue;
pub use deliverer::Deliverer;
