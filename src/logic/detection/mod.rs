//! Detection Module
//!
//! Classifies clipboard, console and inline-script text for paste-and-run
//! ("clickfix") attack patterns.
//!
//! ## Structure
//! - `types`: SourceTag, RuleCategory, DetectionVerdict
//! - `rules`: weighted patterns, combo bonuses, thresholds
//! - `entropy`: Shannon entropy helper
//! - `engine`: the pure classify function
//!
//! ## Usage
//! ```ignore
//! use sentinel_relay::logic::detection::{DetectionEngine, SourceTag};
//!
//! let engine = DetectionEngine::default();
//! if let Some(verdict) = engine.classify("powershell -enc ...", SourceTag::Clipboard) {
//!     println!("score {} tags {:?}", verdict.score, verdict.tags);
//! }
//! ```

pub mod types;
pub mod rules;
pub mod entropy;
pub mod engine;


pub use types::{DetectionVerdict, RuleCategory, SourceTag};
pub use rules::{default_table, ComboSpec, ComboTerm, RuleSpec, RuleTable};
pub use entropy::shannon_entropy;
pub use engine::DetectionEngine;
