//! Culinary topic gate.
//!
//! Decides whether free text belongs to the culinary domain using two
//! independent signals: allow-listed vocabulary and phrase patterns.

use dapur_core::config::GateConfig;
use regex::{Regex, RegexBuilder};

use crate::error::ChatError;

/// The two signals behind a gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateSignals {
    /// A domain keyword occurs somewhere in the text.
    pub keyword: bool,
    /// A domain phrase pattern matches the text.
    pub pattern: bool,
}

impl GateSignals {
    pub fn is_on_topic(&self) -> bool {
        self.keyword || self.pattern
    }
}

// =============================================================================
// TopicClassifier
// =============================================================================

/// Rule-based on-topic / off-topic classifier.
///
/// Keywords are lowercased once at construction; patterns are compiled once
/// and matched case-insensitively.
#[derive(Debug, Clone)]
pub struct TopicClassifier {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl TopicClassifier {
    /// Build a classifier from the gate configuration.
    ///
    /// Blank keywords are ignored (they would match every input). An invalid
    /// pattern is rejected here so that classification itself cannot fail.
    pub fn new(config: &GateConfig) -> Result<Self, ChatError> {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ChatError::InvalidPattern {
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { keywords, patterns })
    }

    /// Whether `text` is about food, drink or cooking.
    pub fn classify(&self, text: &str) -> bool {
        let signals = self.classify_detailed(text);
        tracing::debug!(
            keyword_match = signals.keyword,
            pattern_match = signals.pattern,
            input_len = text.len(),
            "Topic gate evaluated"
        );
        signals.is_on_topic()
    }

    /// Evaluate both signals without collapsing them.
    pub fn classify_detailed(&self, text: &str) -> GateSignals {
        if text.trim().is_empty() {
            return GateSignals::default();
        }
        let normalized = text.to_lowercase();

        GateSignals {
            keyword: self
                .keywords
                .iter()
                .any(|k| normalized.contains(k.as_str())),
            pattern: self.patterns.iter().any(|re| re.is_match(&normalized)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
