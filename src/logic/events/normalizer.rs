//! Event Normalizer
//!
//! Gates signals on the enabled features, strips credentials and routes the
//! result to one of the collector endpoints.

use reqwest::Url;
use serde_json::{json, Map, Value};

use super::event::{NormalizedEvent, Route};
use super::sanitize::{sanitize_headers, sanitize_url, sanitize_value};
use super::signal::{
    ClipboardText, ComponentLifecycle, LifecycleAction, NetworkRequest, RawSignal, ScriptLoad,
};
use crate::logic::config::Config;
use crate::logic::detection::{engine::preview, DetectionVerdict};

pub const CLICKFIX_EVENT: &str = "clickfix_detection";
pub const JS_EXECUTION_EVENT: &str = "javascript_execution";

/// Characters of inline script kept in `javascript_execution` events
const SCRIPT_PREVIEW_CHARS: usize = 200;

// ============================================================================
// DROP REASONS
// ============================================================================

/// Why a signal produced no event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The feature that reports this signal kind is switched off
    FeatureDisabled,
    /// Clipboard/console text the engine did not flag
    NoDetection,
    /// Whitelisted host, or traffic to the collector itself
    Suppressed,
    /// Missing required fields
    Invalid,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::FeatureDisabled => "feature_disabled",
            DropReason::NoDetection => "no_detection",
            DropReason::Suppressed => "suppressed",
            DropReason::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Per-pipeline inputs the normalizer needs besides the signal
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub config: &'a Config,
    pub session_id: &'a str,
}

impl<'a> NormalizeContext<'a> {
    pub fn new(config: &'a Config, session_id: &'a str) -> Self {
        Self { config, session_id }
    }

    fn client_id(&self) -> Option<&'a str> {
        self.config.client_id.as_deref()
    }

    /// Whether `signal` would be classified at all under this config
    pub fn wants_detection(&self, signal: &RawSignal) -> bool {
        match signal {
            RawSignal::ClipboardText(_) => self.config.enable_clickfix,
            RawSignal::ScriptLoad(_) => self.config.enable_js_execution,
            RawSignal::NetworkRequest(_) | RawSignal::ComponentLifecycle(_) => false,
        }
    }
}

// ============================================================================
// NORMALIZE
// ============================================================================

pub fn normalize(
    signal: &RawSignal,
    verdict: Option<&DetectionVerdict>,
    ctx: &NormalizeContext<'_>,
) -> Option<NormalizedEvent> {
    try_normalize(signal, verdict, ctx).ok()
}

/// Like [`normalize`], but reports why a signal was dropped
pub fn try_normalize(
    signal: &RawSignal,
    verdict: Option<&DetectionVerdict>,
    ctx: &NormalizeContext<'_>,
) -> Result<NormalizedEvent, DropReason> {
    match signal {
        RawSignal::NetworkRequest(req) => network_log(req, ctx),
        RawSignal::ClipboardText(clip) => clickfix(clip, verdict, ctx),
        RawSignal::ScriptLoad(script) => script_load(script, verdict, ctx),
        RawSignal::ComponentLifecycle(component) => lifecycle(component, ctx),
    }
}

fn network_log(req: &NetworkRequest, ctx: &NormalizeContext<'_>) -> Result<NormalizedEvent, DropReason> {
    if !ctx.config.enable_report_urls {
        return Err(DropReason::FeatureDisabled);
    }
    if req.url.trim().is_empty() {
        return Err(DropReason::Invalid);
    }
    if is_collector_url(&req.url, ctx.config) || is_whitelisted(&req.url, &ctx.config.domain_whitelist) {
        return Err(DropReason::Suppressed);
    }

    let mut payload = Map::new();
    payload.insert("requestId".into(), Value::String(req.request_id.clone()));
    payload.insert("url".into(), Value::String(sanitize_url(&req.url)));
    payload.insert("method".into(), Value::String(req.method.to_uppercase()));
    payload.insert("type".into(), Value::String(req.resource_type.clone()));
    payload.insert("blocked".into(), Value::Bool(req.blocked));
    if let Some(reason) = &req.block_reason {
        payload.insert("block_reason".into(), Value::String(reason.clone()));
    }

    Ok(NormalizedEvent::new(
        Route::NetworkLog,
        payload,
        ctx.session_id,
        ctx.client_id(),
        req.timestamp,
    ))
}

fn clickfix(
    clip: &ClipboardText,
    verdict: Option<&DetectionVerdict>,
    ctx: &NormalizeContext<'_>,
) -> Result<NormalizedEvent, DropReason> {
    if !ctx.config.enable_clickfix {
        return Err(DropReason::FeatureDisabled);
    }
    let verdict = verdict.ok_or(DropReason::NoDetection)?;

    let mut data = verdict_json(verdict);
    if let Value::Object(map) = &mut data {
        map.insert("page_url".into(), json!(clip.page_url));
    }

    Ok(NormalizedEvent::typed(
        Route::Security,
        CLICKFIX_EVENT,
        sanitize_value(data),
        ctx.session_id,
        ctx.client_id(),
        clip.timestamp,
    ))
}

fn script_load(
    script: &ScriptLoad,
    verdict: Option<&DetectionVerdict>,
    ctx: &NormalizeContext<'_>,
) -> Result<NormalizedEvent, DropReason> {
    if !ctx.config.enable_js_execution {
        return Err(DropReason::FeatureDisabled);
    }
    if script.script_url.is_none() && script.inline_source.is_none() {
        return Err(DropReason::Invalid);
    }

    let inline = script.inline_source.as_deref();
    let data = json!({
        "script_url": script.script_url,
        "page_url": script.page_url,
        "inline": inline.is_some(),
        "length": inline.map(|s| s.chars().count()).unwrap_or(0),
        "preview": inline.map(|s| preview(s, SCRIPT_PREVIEW_CHARS)),
        "request_headers": sanitize_headers(&script.request_headers),
        "detection": verdict.map(verdict_json),
    });

    Ok(NormalizedEvent::typed(
        Route::Extension,
        JS_EXECUTION_EVENT,
        sanitize_value(data),
        ctx.session_id,
        ctx.client_id(),
        script.timestamp,
    ))
}

fn lifecycle(
    component: &ComponentLifecycle,
    ctx: &NormalizeContext<'_>,
) -> Result<NormalizedEvent, DropReason> {
    if component.component_id.trim().is_empty() {
        return Err(DropReason::Invalid);
    }

    let route = match component.action {
        LifecycleAction::SecurityScan => Route::Security,
        _ => Route::Extension,
    };
    let data = json!({
        "id": component.component_id,
        "name": component.name,
        "version": component.version,
        "permissions": component.permissions,
        "details": component.details,
    });

    Ok(NormalizedEvent::typed(
        route,
        component.action.event_type(),
        sanitize_value(data),
        ctx.session_id,
        ctx.client_id(),
        component.timestamp,
    ))
}

fn verdict_json(verdict: &DetectionVerdict) -> Value {
    json!({
        "score": verdict.score,
        "severity": verdict.severity(),
        "tags": verdict.tags,
        "category": verdict.category.as_str(),
        "evidence_preview": verdict.evidence_preview,
        "entropy": verdict.entropy,
        "is_high_risk_family": verdict.is_high_risk_family,
        "terminal_like": verdict.terminal_like,
        "source": verdict.source.as_str(),
    })
}

// ============================================================================
// SUPPRESSION
// ============================================================================

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
}

/// Host equals a whitelisted domain or is one of its subdomains
pub fn is_whitelisted(url: &str, whitelist: &[String]) -> bool {
    if whitelist.is_empty() {
        return false;
    }
    let Some(host) = host_of(url) else {
        return false;
    };
    whitelist.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches("*.").to_ascii_lowercase();
        !domain.is_empty()
            && (host == domain || host.ends_with(&format!(".{}", domain)))
    })
}

// Uploads to the collector are network requests too; never report them
fn is_collector_url(url: &str, config: &Config) -> bool {
    !config.server_url.is_empty() && url.starts_with(&config.server_url)
}
