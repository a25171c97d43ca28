//! Output safety filter.
//!
//! Answers are scored against data-driven topic categories and bypass phrases;
//! off-topic or jailbreak-teaching answers are replaced by a refusal. Answers
//! that pass have sensitive tokens redacted.

use concierge_core::config::load_toml;
use concierge_core::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub const REFUSAL_MESSAGE: &str =
    "I cannot answer questions that are not connected to Quendoo functionalities.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCategory {
    pub category: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRule {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
}

/// Classification data consumed by [`OutputFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    pub disallowed: Vec<TopicCategory>,
    /// Keywords that anchor an answer in the permitted domain.
    pub permitted: Vec<String>,
    pub min_category_hits: usize,
    pub dominance_ratio: usize,
    pub bypass_phrases: Vec<String>,
    pub redactions: Vec<RedactionRule>,
    pub refusal_message: String,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn category(name: &str, keywords: &[&str]) -> TopicCategory {
    TopicCategory {
        category: name.to_string(),
        keywords: words(keywords),
    }
}

fn rule(name: &str, pattern: &str, replacement: &str) -> RedactionRule {
    RedactionRule {
        name: name.to_string(),
        pattern: pattern.to_string(),
        replacement: replacement.to_string(),
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            disallowed: vec![
                category(
                    "medical",
                    &[
                        "medication", "medicine", "prescription", "treatment", "diagnosis",
                        "symptoms", "disease", "illness", "doctor", "hospital", "cure",
                        "therapy", "pill", "drug", "antibiotic", "aspirin", "ibuprofen",
                    ],
                ),
                category(
                    "culinary",
                    &[
                        "recipe", "ingredient", "cook", "bake", "oven", "stir", "mix",
                        "tablespoon", "teaspoon", "flour", "sugar", "butter", "egg",
                        "minutes at", "degrees", "preheat", "simmer", "boil",
                    ],
                ),
                category(
                    "programming",
                    &[
                        "function", "variable", "class", "import", "def ", "const ",
                        "let ", "var ", "if (", "for (", "while (", "console.log",
                        "print(", "algorithm", "syntax",
                    ],
                ),
                category(
                    "gardening",
                    &[
                        "plant", "seed", "soil", "fertilizer", "watering", "prune",
                        "flower", "botanical", "garden", "grow", "root", "leaf",
                    ],
                ),
            ],
            permitted: words(&[
                "room", "booking", "reservation", "check-in", "checkout", "check-out",
                "hotel", "guest", "availability", "quendoo", "property", "accommodation",
                "suite", "bed", "amenity", "amenities", "concierge", "reception",
                "price", "rate", "package", "deal", "stay", "night", "lodging",
                "housekeeping", "front desk", "lobby", "service",
            ]),
            min_category_hits: 2,
            dominance_ratio: 2,
            bypass_phrases: words(&[
                "to bypass",
                "to override",
                "to ignore instructions",
                "you can trick",
                "prompt injection",
            ]),
            redactions: vec![
                rule("api_key", r"sk-[a-zA-Z0-9_-]{20,}", "[REDACTED_API_KEY]"),
                rule(
                    "api_key_assignment",
                    r"(?i)api[_-]?key[:\s=]+[a-zA-Z0-9_-]{20,}",
                    "[REDACTED_API_KEY]",
                ),
                rule(
                    "card_number",
                    r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b",
                    "[REDACTED_CARD]",
                ),
                // Leading `[` excluded so an already-redacted value is left alone.
                rule("password", r"(?i)password[:\s=]+[^\s\[]\S*", "password: [REDACTED]"),
                rule(
                    "jwt",
                    r"eyJ[a-zA-Z0-9_-]*\.eyJ[a-zA-Z0-9_-]*\.[a-zA-Z0-9_-]*",
                    "[REDACTED_TOKEN]",
                ),
            ],
            refusal_message: REFUSAL_MESSAGE.to_string(),
        }
    }
}

impl FilterPolicy {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid redaction pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    pub blocked: bool,
    pub content: String,
    pub redacted: bool,
    pub category: Option<String>,
    pub reason: Option<String>,
    pub redaction_count: usize,
}

impl FilterOutcome {
    fn passed(content: String, redaction_count: usize) -> Self {
        Self {
            blocked: false,
            content,
            redacted: redaction_count > 0,
            category: None,
            reason: None,
            redaction_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total: u64,
    pub blocked: u64,
    pub redacted: u64,
    pub passed: u64,
}

struct CompiledRule {
    regex: Regex,
    replacement: String,
}

pub struct OutputFilter {
    policy: FilterPolicy,
    rules: Vec<CompiledRule>,
    total: AtomicU64,
    blocked: AtomicU64,
    redacted: AtomicU64,
    passed: AtomicU64,
}

impl OutputFilter {
    pub fn new(policy: FilterPolicy) -> Result<Self, FilterError> {
        let rules = policy
            .redactions
            .iter()
            .map(|r| {
                Regex::new(&r.pattern)
                    .map(|regex| CompiledRule {
                        regex,
                        replacement: r.replacement.clone(),
                    })
                    .map_err(|source| FilterError::InvalidPattern {
                        name: r.name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            policy,
            rules,
            total: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            redacted: AtomicU64::new(0),
            passed: AtomicU64::new(0),
        })
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Filter a final answer. `utterance` is the user text that produced it.
    pub fn filter(&self, text: &str, utterance: &str) -> FilterOutcome {
        self.total.fetch_add(1, Ordering::Relaxed);

        if text.is_empty() {
            self.passed.fetch_add(1, Ordering::Relaxed);
            return FilterOutcome::passed(String::new(), 0);
        }

        if let Some((category, reason)) = self.classify(text, utterance) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            info!(category = %category, "replaced off-topic answer");
            return FilterOutcome {
                blocked: true,
                content: self.policy.refusal_message.clone(),
                redacted: false,
                category: Some(category),
                reason: Some(reason),
                redaction_count: 0,
            };
        }

        let (content, count) = self.redact(text);
        if count > 0 {
            self.redacted.fetch_add(1, Ordering::Relaxed);
            debug!(count, "redacted sensitive data from answer");
        }
        self.passed.fetch_add(1, Ordering::Relaxed);
        FilterOutcome::passed(content, count)
    }

    /// Returns `(category, reason)` when the answer must be replaced.
    fn classify(&self, text: &str, utterance: &str) -> Option<(String, String)> {
        let answer = text.to_lowercase();
        let question = utterance.to_lowercase();
        let permitted_in_answer = hits(&answer, &self.policy.permitted);
        let permitted_anywhere = permitted_in_answer > 0 || hits(&question, &self.policy.permitted) > 0;

        for topic in &self.policy.disallowed {
            let topic_hits = hits(&answer, &topic.keywords);
            if topic_hits < self.policy.min_category_hits {
                continue;
            }
            if !permitted_anywhere {
                return Some((
                    topic.category.clone(),
                    format!("off-topic answer detected ({})", topic.category),
                ));
            }
            if topic_hits > permitted_in_answer * self.policy.dominance_ratio {
                return Some((
                    topic.category.clone(),
                    format!("answer too focused on {} rather than hotel operations", topic.category),
                ));
            }
        }

        self.policy
            .bypass_phrases
            .iter()
            .any(|phrase| answer.contains(phrase.as_str()))
            .then(|| ("security".to_string(), "answer teaches security bypass methods".to_string()))
    }

    fn redact(&self, text: &str) -> (String, usize) {
        let mut content = text.to_string();
        let mut count = 0;
        for rule in &self.rules {
            let found = rule.regex.find_iter(&content).count();
            if found > 0 {
                count += found;
                content = rule
                    .regex
                    .replace_all(&content, rule.replacement.as_str())
                    .into_owned();
            }
        }
        (content, count)
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            total: self.total.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            redacted: self.redacted.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
        }
    }
}

/// Number of distinct keywords occurring as substrings of `haystack`.
fn hits(haystack: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|k| haystack.contains(&k.to_lowercase()))
        .count()
}
