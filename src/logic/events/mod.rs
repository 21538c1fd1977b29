//! Events Module
//!
//! Raw sensor signals in, sanitized and routed collector events out.
//!
//! ## Structure
//! - `signal`: RawSignal and its variants
//! - `event`: Route, NormalizedEvent
//! - `sanitize`: URL/header/data credential scrubbing
//! - `normalizer`: feature gating, suppression and routing

pub mod signal;
pub mod event;
pub mod sanitize;
pub mod normalizer;


pub use signal::{
    ClipboardText, ComponentLifecycle, LifecycleAction, NetworkRequest, RawSignal, ScriptLoad,
};
pub use event::{NormalizedEvent, Route};
pub use sanitize::{sanitize_headers, sanitize_url, sanitize_value};
pub use normalizer::{normalize, try_normalize, DropReason, NormalizeContext};
