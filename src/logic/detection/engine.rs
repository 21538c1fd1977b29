//! Detection Engine
//!
//! Classify logic only - patterns and weights live in `rules`.
//! Input: text sample + source tag
//! Output: `Option<DetectionVerdict>`
//!
//! The engine is pure: no I/O, no clock, no shared mutable state. The same
//! sample, source and rule table always produce the same verdict.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::entropy::shannon_entropy;
use super::rules::{
    default_table, ComboTerm, RuleTable, CONSOLE_SOURCE_BONUS, CONSOLE_SOURCE_TAG,
    ENTROPY_BONUS, ENTROPY_THRESHOLD, EVIDENCE_PREVIEW_CHARS, GENERIC_THRESHOLD,
    HIGH_ENTROPY_TAG, MIN_SAMPLE_CHARS, TERMINAL_BASE_BONUS, TERMINAL_TAG, TERMINAL_THRESHOLD,
};
use super::types::{DetectionVerdict, RuleCategory, SourceTag};

/// Heuristic classifier over a compiled rule table
#[derive(Debug, Clone)]
pub struct DetectionEngine {
    table: Arc<RuleTable>,
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new(default_table())
    }
}

impl DetectionEngine {
    pub fn new(table: Arc<RuleTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Classify a sample. `None` means rejected or below the pass mark.
    pub fn classify(&self, sample: &str, source: SourceTag) -> Option<DetectionVerdict> {
        if sample.trim().is_empty() || sample.contains('\0') {
            return None;
        }

        let mut tags = BTreeSet::new();
        let mut matched_rules: BTreeSet<&'static str> = BTreeSet::new();
        let mut category_weight: BTreeMap<RuleCategory, u32> = BTreeMap::new();
        let mut is_high_risk_family = false;
        let mut score = 0u32;

        for rule in self.table.rules() {
            if !rule.regex.is_match(sample) {
                continue;
            }
            let spec = &rule.spec;
            matched_rules.insert(spec.id);
            tags.insert(spec.id.to_string());
            tags.insert(spec.category.as_str().to_string());
            *category_weight.entry(spec.category).or_insert(0) += spec.weight;
            is_high_risk_family |= spec.high_risk;
            score += spec.weight;
        }

        // Short samples only count when a shell launcher is present
        let terminal_like = category_weight.contains_key(&RuleCategory::ShellLauncher);
        if sample.chars().count() < MIN_SAMPLE_CHARS && !terminal_like {
            log::trace!("Short sample without launcher rejected, tags={:?}", tags);
            return None;
        }

        if terminal_like {
            score += TERMINAL_BASE_BONUS;
            tags.insert(TERMINAL_TAG.to_string());
        }

        let entropy = shannon_entropy(sample);
        if entropy > ENTROPY_THRESHOLD {
            score += ENTROPY_BONUS;
            tags.insert(HIGH_ENTROPY_TAG.to_string());
        }

        for combo in self.table.combos() {
            let satisfied = combo.requires.iter().all(|term| match term {
                ComboTerm::Rule(id) => matched_rules.contains(id),
                ComboTerm::Category(category) => category_weight.contains_key(category),
            });
            if satisfied {
                score += combo.bonus;
                tags.insert(combo.id.to_string());
            }
        }

        if source == SourceTag::Console && !matched_rules.is_empty() {
            score += CONSOLE_SOURCE_BONUS;
            tags.insert(CONSOLE_SOURCE_TAG.to_string());
        }

        let threshold = if terminal_like { TERMINAL_THRESHOLD } else { GENERIC_THRESHOLD };
        if score < threshold {
            log::trace!("Sample below threshold ({} < {}), tags={:?}", score, threshold, tags);
            return None;
        }

        // BTreeMap iterates in category order, so ties resolve to the earlier category
        let mut category = RuleCategory::ShellLauncher;
        let mut best = 0u32;
        for (cat, weight) in &category_weight {
            if *weight > best {
                best = *weight;
                category = *cat;
            }
        }

        Some(DetectionVerdict {
            score: score.min(100) as u8,
            tags,
            category,
            evidence_preview: preview(sample, EVIDENCE_PREVIEW_CHARS),
            entropy,
            is_high_risk_family,
            terminal_like,
            source,
        })
    }
}

/// Truncate to at most `max_chars` characters on a char boundary
pub fn preview(sample: &str, max_chars: usize) -> String {
    match sample.char_indices().nth(max_chars) {
        Some((idx, _)) => sample[..idx].to_string(),
        None => sample.to_string(),
    }
}
