//! Error classification (`spec.md` §4.8): a bounded history of classified
//! errors, an ordered rule table, and the cross-error correlation /
//! pattern-detection passes recovery and observability build on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::{Clock, ClassifiedErrorId, SystemClock};

/// Bounded FIFO capacity for [`ErrorClassifier`]'s history.
pub const HISTORY_CAPACITY: usize = 100;

/// The error taxonomy named in `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Connection refused, DNS failure, socket reset, ...
    Network,
    /// A call exceeded its deadline.
    Timeout,
    /// The upstream rejected the call for exceeding a rate limit.
    RateLimit,
    /// Authentication or authorization failed.
    Auth,
    /// The model/LLM provider returned a domain-specific failure.
    Model,
    /// A local resource (memory, disk, quota) was exhausted.
    Resource,
    /// Caller-supplied input failed validation.
    Validation,
    /// A filesystem operation failed.
    Filesystem,
    /// No rule matched.
    Unknown,
}

/// Severity assigned alongside a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; unlikely to need operator attention.
    Low,
    /// Worth surfacing but not urgent.
    Medium,
    /// Likely impacts correctness or availability.
    High,
    /// Requires immediate attention.
    Critical,
}

/// An error after classification. Classification is derived once on
/// ingestion and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Unique id assigned on ingestion.
    pub id: ClassifiedErrorId,
    /// `${name}: ${message}` of the original error, preserved verbatim.
    pub original_error: String,
    /// The matched (or `Unknown`) class.
    pub class: ErrorClass,
    /// Severity associated with the matched rule.
    pub severity: Severity,
    /// Whether the recovery orchestrator should consider retrying.
    pub retryable: bool,
    /// A short human-readable suggestion (`"retry with backoff"`, ...).
    pub suggested_action: &'static str,
    /// Ingestion time, epoch milliseconds.
    pub timestamp_millis: i64,
    /// Caller-supplied context (e.g. `{"sandbox_id": "..."}`).
    pub context: HashMap<String, String>,
}

struct Rule {
    needle: &'static str,
    class: ErrorClass,
    severity: Severity,
    retryable: bool,
    suggested_action: &'static str,
}

/// Ordered rule table; the first matching needle wins. Order matters —
/// more specific needles are listed before generic ones they would
/// otherwise be shadowed by.
fn rule_table() -> &'static [Rule] {
    &[
        Rule { needle: "rate limit", class: ErrorClass::RateLimit, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
        Rule { needle: "too many requests", class: ErrorClass::RateLimit, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
        Rule { needle: "429", class: ErrorClass::RateLimit, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
        Rule { needle: "timeout", class: ErrorClass::Timeout, severity: Severity::Medium, retryable: true, suggested_action: "retry" },
        Rule { needle: "timed out", class: ErrorClass::Timeout, severity: Severity::Medium, retryable: true, suggested_action: "retry" },
        Rule { needle: "deadline exceeded", class: ErrorClass::Timeout, severity: Severity::Medium, retryable: true, suggested_action: "retry" },
        Rule { needle: "unauthorized", class: ErrorClass::Auth, severity: Severity::High, retryable: false, suggested_action: "refresh credentials" },
        Rule { needle: "forbidden", class: ErrorClass::Auth, severity: Severity::High, retryable: false, suggested_action: "refresh credentials" },
        Rule { needle: "401", class: ErrorClass::Auth, severity: Severity::High, retryable: false, suggested_action: "refresh credentials" },
        Rule { needle: "403", class: ErrorClass::Auth, severity: Severity::High, retryable: false, suggested_action: "refresh credentials" },
        Rule { needle: "invalid api key", class: ErrorClass::Auth, severity: Severity::High, retryable: false, suggested_action: "refresh credentials" },
        Rule { needle: "context length", class: ErrorClass::Model, severity: Severity::Medium, retryable: true, suggested_action: "fallback to another model" },
        Rule { needle: "content filter", class: ErrorClass::Model, severity: Severity::High, retryable: false, suggested_action: "abort" },
        Rule { needle: "model overloaded", class: ErrorClass::Model, severity: Severity::Medium, retryable: true, suggested_action: "fallback to another model" },
        Rule { needle: "out of memory", class: ErrorClass::Resource, severity: Severity::Critical, retryable: false, suggested_action: "reduce workload" },
        Rule { needle: "disk full", class: ErrorClass::Resource, severity: Severity::Critical, retryable: false, suggested_action: "reduce workload" },
        Rule { needle: "resource exhausted", class: ErrorClass::Resource, severity: Severity::High, retryable: false, suggested_action: "reduce workload" },
        Rule { needle: "quota exceeded", class: ErrorClass::Resource, severity: Severity::High, retryable: false, suggested_action: "reduce workload" },
        Rule { needle: "validation", class: ErrorClass::Validation, severity: Severity::Low, retryable: false, suggested_action: "fix input and resubmit" },
        Rule { needle: "invalid argument", class: ErrorClass::Validation, severity: Severity::Low, retryable: false, suggested_action: "fix input and resubmit" },
        Rule { needle: "schema", class: ErrorClass::Validation, severity: Severity::Low, retryable: false, suggested_action: "fix input and resubmit" },
        Rule { needle: "enoent", class: ErrorClass::Filesystem, severity: Severity::Medium, retryable: false, suggested_action: "check path and permissions" },
        Rule { needle: "permission denied", class: ErrorClass::Filesystem, severity: Severity::Medium, retryable: false, suggested_action: "check path and permissions" },
        Rule { needle: "no such file", class: ErrorClass::Filesystem, severity: Severity::Medium, retryable: false, suggested_action: "check path and permissions" },
        Rule { needle: "econnrefused", class: ErrorClass::Network, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
        Rule { needle: "connection reset", class: ErrorClass::Network, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
        Rule { needle: "dns", class: ErrorClass::Network, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
        Rule { needle: "network", class: ErrorClass::Network, severity: Severity::Medium, retryable: true, suggested_action: "retry with backoff" },
    ]
}

/// Two error classes that co-occurred within a correlation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// The first class, in table order.
    pub class_a: ErrorClass,
    /// The second class, in table order.
    pub class_b: ErrorClass,
    /// `pair_occurrences / min(count(a), count(b))`.
    pub confidence: f64,
}

/// A recurring error class summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// The class this pattern describes.
    pub class: ErrorClass,
    /// Number of occurrences in history.
    pub count: usize,
    /// Timestamp of the earliest occurrence.
    pub first_seen_millis: i64,
    /// Timestamp of the most recent occurrence.
    pub last_seen_millis: i64,
    /// Average gap between consecutive occurrences, `None` if `count < 2`.
    pub avg_interval_millis: Option<f64>,
}

/// Classifies errors by matching against an ordered rule table and
/// retains a bounded history for correlation and pattern detection.
pub struct ErrorClassifier {
    clock: Arc<dyn Clock>,
    history: RwLock<VecDeque<ClassifiedError>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ErrorClassifier {
    /// Creates a classifier using the given clock for ingestion
    /// timestamps.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Classifies `${name} ${message}` (matched lowercase against the rule
    /// table) and appends the result to history, evicting the oldest
    /// entry once the history exceeds [`HISTORY_CAPACITY`].
    pub fn classify(
        &self,
        name: &str,
        message: &str,
        context: HashMap<String, String>,
    ) -> ClassifiedError {
        let haystack = format!("{name} {message}").to_lowercase();
        let matched = rule_table().iter().find(|rule| haystack.contains(rule.needle));

        let classified = ClassifiedError {
            id: ClassifiedErrorId::v4(),
            original_error: format!("{name}: {message}"),
            class: matched.map_or(ErrorClass::Unknown, |r| r.class),
            severity: matched.map_or(Severity::Low, |r| r.severity),
            retryable: matched.is_some_and(|r| r.retryable),
            suggested_action: matched.map_or("none", |r| r.suggested_action),
            timestamp_millis: self.clock.now_millis(),
            context,
        };

        let mut history = self.history.write();
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(classified.clone());
        classified
    }

    /// All retained classified errors, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ClassifiedError> {
        self.history.read().iter().cloned().collect()
    }

    /// Counts how often distinct classes co-occur within `window_millis`
    /// of each other, sorted by descending confidence.
    #[must_use]
    pub fn correlate_errors(&self, window_millis: i64) -> Vec<Correlation> {
        let history = self.history.read();
        let entries: Vec<&ClassifiedError> = history.iter().collect();

        let mut counts: HashMap<ErrorClass, usize> = HashMap::new();
        for e in &entries {
            *counts.entry(e.class).or_insert(0) += 1;
        }

        let mut pair_counts: HashMap<(ErrorClass, ErrorClass), usize> = HashMap::new();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if (b.timestamp_millis - a.timestamp_millis).abs() > window_millis {
                    continue;
                }
                if a.class == b.class {
                    continue;
                }
                let key = order_pair(a.class, b.class);
                *pair_counts.entry(key).or_insert(0) += 1;
            }
        }

        let mut correlations: Vec<Correlation> = pair_counts
            .into_iter()
            .map(|((a, b), pair_occurrences)| {
                let denom = counts.get(&a).copied().unwrap_or(1).min(counts.get(&b).copied().unwrap_or(1));
                Correlation {
                    class_a: a,
                    class_b: b,
                    confidence: pair_occurrences as f64 / denom.max(1) as f64,
                }
            })
            .collect();
        correlations.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        correlations
    }

    /// Groups history by class and summarizes recurrence.
    #[must_use]
    pub fn detect_patterns(&self) -> Vec<Pattern> {
        let history = self.history.read();
        let mut by_class: HashMap<ErrorClass, Vec<i64>> = HashMap::new();
        for e in history.iter() {
            by_class.entry(e.class).or_default().push(e.timestamp_millis);
        }

        let mut patterns: Vec<Pattern> = by_class
            .into_iter()
            .map(|(class, mut timestamps)| {
                timestamps.sort_unstable();
                let avg_interval_millis = if timestamps.len() >= 2 {
                    let span = (timestamps[timestamps.len() - 1] - timestamps[0]) as f64;
                    Some(span / (timestamps.len() - 1) as f64)
                } else {
                    None
                };
                Pattern {
                    class,
                    count: timestamps.len(),
                    first_seen_millis: timestamps[0],
                    last_seen_millis: timestamps[timestamps.len() - 1],
                    avg_interval_millis,
                }
            })
            .collect();
        patterns.sort_by_key(|p| p.class as u8);
        patterns
    }
}

/// Canonicalizes a pair so `(a, b)` and `(b, a)` count as the same key.
fn order_pair(a: ErrorClass, b: ErrorClass) -> (ErrorClass, ErrorClass) {
    if (a as u8) <= (b as u8) { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(Arc::new(warden_core::FixedClock::new(0)))
    }

    #[test]
    fn classifies_known_patterns() {
        let c = classifier();
        let result = c.classify("Error", "connection timeout while calling upstream", HashMap::new());
        assert_eq!(result.class, ErrorClass::Timeout);
        assert!(result.retryable);
    }

    #[test]
    fn unmatched_error_classifies_as_unknown_and_not_retryable() {
        let c = classifier();
        let result = c.classify("Error", "something bizarre happened", HashMap::new());
        assert_eq!(result.class, ErrorClass::Unknown);
        assert!(!result.retryable);
    }

    #[test]
    fn history_evicts_oldest_beyond_capacity() {
        let c = classifier();
        for i in 0..HISTORY_CAPACITY + 10 {
            c.classify("Error", &format!("validation failure {i}"), HashMap::new());
        }
        assert_eq!(c.history().len(), HISTORY_CAPACITY);
    }

    #[test]
    fn correlate_errors_pairs_co_occurring_classes() {
        let clock = Arc::new(warden_core::FixedClock::new(0));
        let c = ErrorClassifier::new(clock.clone());
        c.classify("Error", "request timeout", HashMap::new());
        clock.advance(100);
        c.classify("Error", "rate limit exceeded", HashMap::new());

        let correlations = c.correlate_errors(1_000);
        assert_eq!(correlations.len(), 1);
        assert_eq!(correlations[0].confidence, 1.0);
    }

    #[test]
    fn detect_patterns_reports_none_interval_for_single_sample() {
        let c = classifier();
        c.classify("Error", "validation failed", HashMap::new());
        let patterns = c.detect_patterns();
        let validation = patterns.iter().find(|p| p.class == ErrorClass::Validation).unwrap();
        assert_eq!(validation.count, 1);
        assert_eq!(validation.avg_interval_millis, None);
    }
}
