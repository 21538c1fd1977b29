//! Detection Types
//!
//! Core types for clipboard/console classification.
//! Data structures only - no scoring logic lives here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ============================================================================
// SOURCE TAG
// ============================================================================

/// Where a sample (or signal) originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// webRequest-style network observer
    Network,
    /// Clipboard copy/paste observer
    Clipboard,
    /// Text pasted or typed into a developer console
    Console,
    /// Inline or remote script load
    Script,
    /// Component install/uninstall/scan hooks
    Lifecycle,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Network => "network",
            SourceTag::Clipboard => "clipboard",
            SourceTag::Console => "console",
            SourceTag::Script => "script",
            SourceTag::Lifecycle => "lifecycle",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RULE CATEGORY
// ============================================================================

/// Category of a heuristic rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// powershell, cmd, mshta, bash ...
    ShellLauncher,
    /// -EncodedCommand flags, base64 blobs, FromBase64String
    EncodedCommand,
    /// Remote payload locations
    DownloadUrl,
    /// Hex/unicode escapes, concatenation, env-var expansion
    Obfuscation,
    /// fetch/XHR/storage/eval-like APIs
    ScriptingApi,
    /// Invoke-Expression, pipe-to-shell, Start-Process ...
    Execution,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::ShellLauncher => "shell_launcher",
            RuleCategory::EncodedCommand => "encoded_command",
            RuleCategory::DownloadUrl => "download_url",
            RuleCategory::Obfuscation => "obfuscation",
            RuleCategory::ScriptingApi => "scripting_api",
            RuleCategory::Execution => "execution",
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// VERDICT
// ============================================================================

/// Result of classifying a text sample
///
/// Produced only by the detection engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    /// Clamped risk score (0 - 100)
    pub score: u8,
    /// Every matched rule, combo and category id
    pub tags: BTreeSet<String>,
    /// Category contributing the most weight
    pub category: RuleCategory,
    /// Truncated sample, never longer than the preview limit
    pub evidence_preview: String,
    /// Shannon entropy (bits/char)
    pub entropy: f64,
    /// A rule flagged as high-risk family matched
    pub is_high_risk_family: bool,
    /// A shell launcher was present
    pub terminal_like: bool,
    /// Where the sample came from
    pub source: SourceTag,
}

impl DetectionVerdict {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Severity bucket used in collector payloads
    pub fn severity(&self) -> &'static str {
        match self.score {
            85..=100 => "critical",
            60..=84 => "high",
            40..=59 => "medium",
            _ => "low",
        }
    }
}
