//! Detection Rule Table
//!
//! Data-driven heuristics for paste-and-run detection.
//! Contains patterns, weights and thresholds only - no classify logic.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::RuleCategory;

// ============================================================================
// THRESHOLDS (constants - not changed at runtime)
// ============================================================================

/// Samples shorter than this are ignored unless a shell launcher matches
pub const MIN_SAMPLE_CHARS: usize = 20;

/// Pass mark for samples containing a shell launcher
pub const TERMINAL_THRESHOLD: u32 = 30;

/// Pass mark for everything else
pub const GENERIC_THRESHOLD: u32 = 50;

/// Added once when any shell launcher is present
pub const TERMINAL_BASE_BONUS: u32 = 15;

/// Entropy (bits/char) above which the obfuscation bonus applies
pub const ENTROPY_THRESHOLD: f64 = 4.5;

/// Added when entropy exceeds the threshold
pub const ENTROPY_BONUS: u32 = 10;

/// Added for samples pasted straight into a developer console
pub const CONSOLE_SOURCE_BONUS: u32 = 5;

/// Maximum characters echoed back in a verdict
pub const EVIDENCE_PREVIEW_CHARS: usize = 500;

/// Tag emitted alongside the terminal base bonus
pub const TERMINAL_TAG: &str = "is-terminal-like";

/// Tag emitted alongside the entropy bonus
pub const HIGH_ENTROPY_TAG: &str = "high_entropy";

/// Tag emitted alongside the console source bonus
pub const CONSOLE_SOURCE_TAG: &str = "source:console";

// ============================================================================
// RULE SPECS
// ============================================================================

/// A single weighted pattern
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub id: &'static str,
    /// Regex source, compiled case-insensitively
    pub pattern: &'static str,
    pub category: RuleCategory,
    pub weight: u32,
    /// Marks download-and-run style families
    pub high_risk: bool,
}

const fn rule(
    id: &'static str,
    pattern: &'static str,
    category: RuleCategory,
    weight: u32,
    high_risk: bool,
) -> RuleSpec {
    RuleSpec { id, pattern, category, weight, high_risk }
}

use RuleCategory::*;

/// Built-in rules
pub const DEFAULT_RULES: &[RuleSpec] = &[
    // Shell / script launchers
    rule("powershell", r"\b(?:powershell|pwsh)(?:\.exe)?\b", ShellLauncher, 20, false),
    rule("cmd_exe", r"\bcmd(?:\.exe)?\s+/[ck]\b", ShellLauncher, 20, false),
    rule("mshta", r"\bmshta(?:\.exe)?\b", ShellLauncher, 25, true),
    rule("rundll32", r"\brundll32(?:\.exe)?\b", ShellLauncher, 20, false),
    rule("wscript", r"\b[wc]script(?:\.exe)?\b", ShellLauncher, 20, false),
    rule("unix_shell", r"\b(?:bash|sh|zsh)\s+-c\b", ShellLauncher, 15, false),
    rule("certutil", r"\bcertutil(?:\.exe)?\b.*-urlcache", ShellLauncher, 25, true),
    rule("bitsadmin", r"\bbitsadmin(?:\.exe)?\b", ShellLauncher, 15, false),
    // Encoded commands
    rule(
        "encoded_command_flag",
        r"(?:^|\s)-(?:e|ec|en|enc|enco|encodedcommand)\s+[a-z0-9+/=]{8,}",
        EncodedCommand,
        25,
        true,
    ),
    rule("base64_blob", r"[a-z0-9+/]{40,}={0,2}", EncodedCommand, 15, false),
    rule("from_base64", r"frombase64string|\batob\s*\(", EncodedCommand, 15, false),
    rule("base64_decode_pipe", r"\bbase64\s+(?:-d|--decode)\b", EncodedCommand, 20, false),
    // Download locations
    rule("http_url", r#"https?://[^\s'"]+"#, DownloadUrl, 5, false),
    rule(
        "payload_extension_url",
        r#"https?://[^\s'"]+\.(?:exe|ps1|hta|bat|cmd|vbs|msi|dll|scr|sh)\b"#,
        DownloadUrl,
        20,
        true,
    ),
    rule(
        "download_cradle",
        r"downloadstring|downloadfile|invoke-webrequest|\biwr\b|\bcurl\b|\bwget\b|start-bitstransfer|net\.webclient",
        DownloadUrl,
        15,
        false,
    ),
    rule("raw_ip_url", r"https?://\d{1,3}(?:\.\d{1,3}){3}", DownloadUrl, 15, false),
    // Obfuscation
    rule("hex_escape", r"(?:\\x[0-9a-f]{2}){4,}", Obfuscation, 10, false),
    rule("unicode_escape", r"(?:\\u[0-9a-f]{4}){3,}", Obfuscation, 10, false),
    rule("string_concat", r#"['"]\s*\+\s*['"]"#, Obfuscation, 10, false),
    rule("env_var_expansion", r"%[a-z_]+%|\$env:[a-z_]+", Obfuscation, 10, false),
    rule("char_code", r"\[char\]\s*\d+|fromcharcode", Obfuscation, 10, false),
    rule("caret_escape", r"\w\^\w\^\w", Obfuscation, 10, false),
    // Scripting APIs
    rule("fetch_api", r"\bfetch\s*\(|xmlhttprequest|navigator\.sendbeacon", ScriptingApi, 10, false),
    rule("storage_api", r"localstorage|sessionstorage|document\.cookie|indexeddb", ScriptingApi, 10, false),
    rule("eval_call", r#"\beval\s*\(|new\s+function\s*\(|settimeout\s*\(\s*['"]"#, ScriptingApi, 15, false),
    // Execution
    rule("invoke_expression", r"invoke-expression|\biex\b", Execution, 20, false),
    rule("pipe_to_shell", r"\|\s*(?:ba|z)?sh\b|\|\s*iex\b", Execution, 20, true),
    rule("start_process", r"start-process|\bstart\s+/b\b|shellexecute", Execution, 10, false),
    rule(
        "hidden_window",
        r"-w(?:indowstyle)?\s+h(?:idden)?\b|\s-noni?\b|\s-nop(?:rofile)?\b|-exec(?:utionpolicy)?\s+bypass",
        Execution,
        10,
        false,
    ),
];

// ============================================================================
// COMBINATION BONUSES
// ============================================================================

/// A term a combo requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboTerm {
    Rule(&'static str),
    Category(RuleCategory),
}

/// Non-linear bonus applied when every term is present
#[derive(Debug, Clone, Copy)]
pub struct ComboSpec {
    pub id: &'static str,
    pub requires: &'static [ComboTerm],
    pub bonus: u32,
}

/// Built-in combination bonuses
pub const DEFAULT_COMBOS: &[ComboSpec] = &[
    ComboSpec {
        id: "combo:execute+download",
        requires: &[ComboTerm::Category(Execution), ComboTerm::Category(DownloadUrl)],
        bonus: 35,
    },
    ComboSpec {
        id: "combo:encoded-command",
        requires: &[ComboTerm::Rule("encoded_command_flag")],
        bonus: 30,
    },
    ComboSpec {
        id: "combo:launcher+download",
        requires: &[ComboTerm::Category(ShellLauncher), ComboTerm::Rule("download_cradle")],
        bonus: 25,
    },
    ComboSpec {
        id: "combo:decode+eval",
        requires: &[ComboTerm::Rule("from_base64"), ComboTerm::Rule("eval_call")],
        bonus: 25,
    },
    ComboSpec {
        id: "combo:launcher+obfuscation",
        requires: &[ComboTerm::Category(ShellLauncher), ComboTerm::Category(Obfuscation)],
        bonus: 20,
    },
    ComboSpec {
        id: "combo:hidden-launcher",
        requires: &[ComboTerm::Rule("hidden_window"), ComboTerm::Category(ShellLauncher)],
        bonus: 15,
    },
];

// ============================================================================
// COMPILED TABLE
// ============================================================================

/// A rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub spec: RuleSpec,
    pub regex: Regex,
}

/// Compiled rules and combos, built once and shared read-only
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<CompiledRule>,
    combos: Vec<ComboSpec>,
}

impl RuleTable {
    /// Compile a table from specs
    pub fn new(rules: &[RuleSpec], combos: &[ComboSpec]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|spec| {
                Ok(CompiledRule {
                    spec: *spec,
                    regex: Regex::new(&format!("(?i){}", spec.pattern))?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            rules,
            combos: combos.to_vec(),
        })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn combos(&self) -> &[ComboSpec] {
        &self.combos
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

static DEFAULT_TABLE: Lazy<Arc<RuleTable>> = Lazy::new(|| {
    Arc::new(
        RuleTable::new(DEFAULT_RULES, DEFAULT_COMBOS)
            .expect("built-in detection rules must compile"),
    )
});

/// Shared handle to the built-in table
pub fn default_table() -> Arc<RuleTable> {
    Arc::clone(&DEFAULT_TABLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_table_compiles() {
        let table = default_table();
        assert_eq!(table.len(), DEFAULT_RULES.len());
        assert_eq!(table.combos().len(), DEFAULT_COMBOS.len());
    }

    #[test]
    fn test_rule_ids_unique() {
        let ids: HashSet<_> = DEFAULT_RULES.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), DEFAULT_RULES.len());
    }

    #[test]
    fn test_combo_rule_terms_exist() {
        for combo in DEFAULT_COMBOS {
            for term in combo.requires {
                if let ComboTerm::Rule(id) = term {
                    assert!(
                        DEFAULT_RULES.iter().any(|r| r.id == *id),
                        "combo {} references unknown rule {}",
                        combo.id,
                        id
                    );
                }
            }
        }
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let bad = [rule("broken", r"(unclosed", Obfuscation, 1, false)];
        assert!(RuleTable::new(&bad, &[]).is_err());
    }
}
