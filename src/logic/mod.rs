//! Logic Module - Detection & Relay Engines
//!
//! ## Architecture
//! - `detection/` - clickfix scoring (rules, entropy, engine)
//! - `events/` - raw signals, sanitization, normalization
//! - `pipeline/` - bounded buffer and flush scheduling
//! - `delivery/` - payloads, transport, retry, dead letters
//! - `storage/` - key-value persistence and batch backup
//! - `config`, `clock`, `stats` - shared plumbing

pub mod clock;
pub mod config;
pub mod stats;

pub mod detection;
pub mod events;
pub mod pipeline;
pub mod delivery;
pub mod storage;
