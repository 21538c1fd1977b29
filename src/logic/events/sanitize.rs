//! Credential scrubbing for URLs, headers and event data

use std::collections::BTreeMap;

use reqwest::Url;
use serde_json::Value;

use crate::constants::REDACTED;

/// Query parameters whose values are never reported
pub const SENSITIVE_PARAMS: &[&str] = &[
    "password", "token", "key", "secret", "api_key", "apikey", "auth",
];

/// Header names whose values are never reported
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

fn is_sensitive_param(name: &str) -> bool {
    SENSITIVE_PARAMS.iter().any(|p| p.eq_ignore_ascii_case(name))
}

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Redact sensitive query parameters. Malformed URLs are returned unchanged.
pub fn sanitize_url(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if !pairs.iter().any(|(k, _)| is_sensitive_param(k)) {
        return raw.to_string();
    }

    url.query_pairs_mut().clear().extend_pairs(pairs.iter().map(|(k, v)| {
        if is_sensitive_param(k) {
            (k.as_str(), REDACTED)
        } else {
            (k.as_str(), v.as_str())
        }
    }));

    url.to_string()
}

/// Redact sensitive header values, keeping the header names
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_header(name) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

/// Walk an event `data` value: header-named keys are redacted and URL
/// strings are passed through `sanitize_url`.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if is_sensitive_header(&k) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, sanitize_value(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::String(s) if looks_like_url(&s) => Value::String(sanitize_url(&s)),
        other => other,
    }
}

fn looks_like_url(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
