//! Raw Signals
//!
//! What the external sensors hand to `Pipeline::submit`. Immutable once
//! created; internally tagged on `"kind"` so sensors can emit JSON lines.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::detection::SourceTag;

fn network_source() -> SourceTag {
    SourceTag::Network
}

fn clipboard_source() -> SourceTag {
    SourceTag::Clipboard
}

fn script_source() -> SourceTag {
    SourceTag::Script
}

fn lifecycle_source() -> SourceTag {
    SourceTag::Lifecycle
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_resource_type() -> String {
    "other".to_string()
}

// ============================================================================
// SIGNAL VARIANTS
// ============================================================================

/// Observed network request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    #[serde(default = "network_source")]
    pub source: SourceTag,
    #[serde(default)]
    pub request_id: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// main_frame, script, xmlhttprequest ...
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Text copied to the clipboard or pasted into a console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardText {
    /// `Clipboard` or `Console`
    #[serde(default = "clipboard_source")]
    pub source: SourceTag,
    pub text: String,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Remote or inline script observed on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLoad {
    #[serde(default = "script_source")]
    pub source: SourceTag,
    #[serde(default)]
    pub script_url: Option<String>,
    #[serde(default)]
    pub inline_source: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Installed,
    Uninstalled,
    Enabled,
    Disabled,
    /// Periodic permission/risk scan of an installed component
    SecurityScan,
}

impl LifecycleAction {
    /// `event_type` reported to the collector
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleAction::Installed => "extension_installed",
            LifecycleAction::Uninstalled => "extension_uninstalled",
            LifecycleAction::Enabled => "extension_enabled",
            LifecycleAction::Disabled => "extension_disabled",
            LifecycleAction::SecurityScan => "extension_security_scan",
        }
    }
}

/// Browser component (extension) lifecycle change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentLifecycle {
    #[serde(default = "lifecycle_source")]
    pub source: SourceTag,
    pub action: LifecycleAction,
    pub component_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// RAW SIGNAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSignal {
    NetworkRequest(NetworkRequest),
    ClipboardText(ClipboardText),
    ScriptLoad(ScriptLoad),
    ComponentLifecycle(ComponentLifecycle),
}

impl RawSignal {
    pub fn source(&self) -> SourceTag {
        match self {
            RawSignal::NetworkRequest(s) => s.source,
            RawSignal::ClipboardText(s) => s.source,
            RawSignal::ScriptLoad(s) => s.source,
            RawSignal::ComponentLifecycle(s) => s.source,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RawSignal::NetworkRequest(s) => s.timestamp,
            RawSignal::ClipboardText(s) => s.timestamp,
            RawSignal::ScriptLoad(s) => s.timestamp,
            RawSignal::ComponentLifecycle(s) => s.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawSignal::NetworkRequest(_) => "network_request",
            RawSignal::ClipboardText(_) => "clipboard_text",
            RawSignal::ScriptLoad(_) => "script_load",
            RawSignal::ComponentLifecycle(_) => "component_lifecycle",
        }
    }

    /// Text the detection engine should look at, if any
    pub fn detection_sample(&self) -> Option<&str> {
        match self {
            RawSignal::ClipboardText(s) => Some(s.text.as_str()),
            RawSignal::ScriptLoad(s) => s.inline_source.as_deref(),
            RawSignal::NetworkRequest(_) | RawSignal::ComponentLifecycle(_) => None,
        }
    }
}
