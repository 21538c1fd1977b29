//! Sentinel Relay
//!
//! Clickfix detection engine plus a buffered, retrying relay that ships
//! browser security telemetry to a collector.

pub mod constants;
pub mod logic;

pub use logic::clock::{Clock, ManualClock, SystemClock};
pub use logic::config::{Config, ConfigError, ConfigHandle};
pub use logic::delivery::{DeliveryError, DeliveryOutcome, HttpTransport, Transport};
pub use logic::detection::{DetectionEngine, DetectionVerdict, RuleCategory, SourceTag};
pub use logic::events::{DropReason, NormalizedEvent, RawSignal, Route};
pub use logic::pipeline::{Pipeline, SubmitOutcome};
pub use logic::stats::Statistics;
pub use logic::storage::{FileStore, KeyValueStore, MemoryStore};
