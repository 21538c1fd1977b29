//! Pipeline Module
//!
//! Buffering and flush scheduling between ingestion and delivery.
//!
//! ## Structure
//! - `buffer`: bounded EventBuffer, DeliveryBatch
//! - `relay`: Pipeline (submit, flush, recover_backup, shutdown)

pub mod buffer;
pub mod relay;

#[cfg(test)]
mod tests;

pub use buffer::{BufferStatus, DeliveryBatch, EnqueueOutcome, EventBuffer};
pub use relay::{Pipeline, SubmitOutcome};
