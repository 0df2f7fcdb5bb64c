//! Step error classification

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::ErrorClass;

/// Phrases that mark a failure as transient
///
/// Matched case-insensitively on word boundaries.
pub const DEFAULT_TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "network",
    "rate limit",
    "rate limited",
    "too many requests",
    "429",
    "502",
    "503",
    "504",
    "service unavailable",
    "overloaded",
    "econnreset",
    "etimedout",
    "broken pipe",
    "try again",
    "temporarily unavailable",
];

/// Strategy for deciding whether a step failure is worth retrying
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> ErrorClass;
}

/// Classifies by matching known transient phrases
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<String>,
    matchers: Vec<Regex>,
}

impl PatternClassifier {
    /// Classifier matching exactly these patterns
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self {
            patterns: Vec::new(),
            matchers: Vec::new(),
        };
        for pattern in patterns {
            classifier.add(pattern.as_ref());
        }
        classifier
    }

    /// Default patterns plus extras from configuration
    pub fn with_extra_patterns<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self::default();
        for pattern in extra {
            classifier.add(pattern.as_ref());
        }
        classifier
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    fn add(&mut self, pattern: &str) {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() || self.patterns.contains(&pattern) {
            return;
        }
        match word_pattern(&pattern) {
            Ok(re) => {
                self.patterns.push(pattern);
                self.matchers.push(re);
            }
            Err(e) => warn!(%pattern, error = %e, "Ignoring unusable transient pattern"),
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSIENT_PATTERNS)
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, message: &str) -> ErrorClass {
        let hit = self.matchers.iter().position(|re| re.is_match(message));
        match hit {
            Some(i) => {
                debug!(pattern = %self.patterns[i], "PatternClassifier::classify: transient");
                ErrorClass::Transient
            }
            None => {
                debug!("PatternClassifier::classify: permanent");
                ErrorClass::Permanent
            }
        }
    }
}

/// Classify with the default patterns
pub fn classify(message: &str) -> ErrorClass {
    PatternClassifier::default().classify(message)
}

/// Case-insensitive regex for `phrase` as a whole word or phrase
///
/// Boundaries are only required next to word characters, so a phrase
/// ending in punctuation still matches before more punctuation.
fn word_pattern(phrase: &str) -> Result<Regex, regex::Error> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if phrase.starts_with(is_word) { r"\b" } else { "" };
    let trail = if phrase.ends_with(is_word) { r"\b" } else { "" };
    Regex::new(&format!("(?i){}{}{}", lead, regex::escape(phrase), trail))
}
