//! Pattern detector.
//!
//! Scores a query against the signature registry. Evaluation runs under a
//! wall-clock [`Deadline`] that is checked before every regex evaluation and
//! every structural step; running out of time is an error, never a pass.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use super::complexity;
use super::patterns::{
    ThreatCategory, ThreatSignature, COMPILED_SIGNATURES, DOTTED_KEY, ENCODING_EXPANSION,
    ENCODING_LAYER_LIMIT, EXCESSIVE_DEPTH, LOGICAL_CHAIN, MULTI_LAYER_ENCODING, OPERATOR_KEY,
    OVERSIZED_ARRAY, OVERSIZED_PAYLOAD, REGEX_OPERATOR_REDOS, WHERE_KEY,
};
use crate::config::PipelineConfig;
use crate::error::{GuardError, Result};
use crate::normalize::{join_path, Normalized, NormalizedLeaf, Normalizer, Suspicion, ROOT_FIELD};

/// Logical operators whose nesting is bounded
const LOGICAL_OPERATORS: &[&str] = &["$or", "$and", "$nor"];

/// Logical operator nesting allowed before it counts as a chain
const MAX_LOGICAL_DEPTH: usize = 2;

/// Wall-clock budget for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline now
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Whether the budget is used up
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }

    /// Time since the deadline started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Fail with a timeout attributed to `field` if expired
    pub fn check(&self, field: &str) -> Result<()> {
        if self.expired() {
            return Err(GuardError::Timeout {
                field: field.to_string(),
                budget_ms: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// A signature that matched, with where it matched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedThreat {
    /// Signature name
    pub name: &'static str,
    /// Threat category
    pub category: ThreatCategory,
    /// Severity (0.0 - 1.0)
    pub severity: f32,
    /// Description
    pub description: &'static str,
    /// Top-level field
    pub field: String,
    /// Dotted path of the offending key or value
    pub path: String,
}

impl DetectedThreat {
    fn new(signature: &'static ThreatSignature, field: &str, path: &str) -> Self {
        Self {
            name: signature.name,
            category: signature.category,
            severity: signature.severity,
            description: signature.description,
            field: field.to_string(),
            path: path.to_string(),
        }
    }
}

/// Result of scoring one input
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreatReport {
    /// Matched signatures, one per (signature, path)
    pub threats: Vec<DetectedThreat>,
    /// Aggregate risk score (0.0 - 1.0)
    pub risk_score: f32,
}

impl ThreatReport {
    fn from_threats(threats: Vec<DetectedThreat>) -> Self {
        let risk_score = aggregate_score(&threats);
        Self {
            threats,
            risk_score,
        }
    }

    /// No signature matched
    pub fn is_clean(&self) -> bool {
        self.threats.is_empty()
    }

    /// Highest-severity threat (first found on ties)
    pub fn top(&self) -> Option<&DetectedThreat> {
        self.threats
            .iter()
            .fold(None, |best: Option<&DetectedThreat>, t| match best {
                Some(b) if b.severity >= t.severity => Some(b),
                _ => Some(t),
            })
    }

    /// Names of matched signatures, deduplicated, in match order
    pub fn signature_names(&self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        self.threats
            .iter()
            .filter(|t| seen.insert(t.name))
            .map(|t| t.name)
            .collect()
    }

    /// Whether any threat has the given category
    pub fn has_category(&self, category: ThreatCategory) -> bool {
        self.threats.iter().any(|t| t.category == category)
    }
}

/// Probabilistic OR over distinct signatures: `1 - Π(1 - severity)`.
pub fn aggregate_score(threats: &[DetectedThreat]) -> f32 {
    let mut seen = HashSet::new();
    let clean = threats
        .iter()
        .filter(|t| seen.insert(t.name))
        .fold(1.0f32, |acc, t| acc * (1.0 - t.severity.clamp(0.0, 1.0)));
    (1.0 - clean).clamp(0.0, 1.0)
}

/// Signature-based threat detector
#[derive(Debug, Clone)]
pub struct PatternDetector {
    /// Normalizer used by [`PatternDetector::scan`]
    normalizer: Normalizer,
    /// Aggregate score at or above which input is rejected
    pub risk_threshold: f32,
    /// Evaluation budget
    pub timeout: Duration,
    /// Maximum serialized input size (bytes)
    pub max_input_bytes: usize,
    /// Maximum nesting depth
    pub max_depth: usize,
    /// Maximum array length
    pub max_array_len: usize,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl PatternDetector {
    /// Create detector with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create detector from pipeline configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        // Compile the registry now so the first request's budget is not spent on it
        lazy_static::initialize(&COMPILED_SIGNATURES);
        Self {
            normalizer: Normalizer::from_config(config),
            risk_threshold: config.risk_threshold,
            timeout: config.eval_timeout(),
            max_input_bytes: config.max_input_bytes,
            max_depth: config.max_depth,
            max_array_len: config.max_array_len,
        }
    }

    /// Set the evaluation budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the rejection threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.risk_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Whether a report's score reaches the rejection threshold
    pub fn should_reject(&self, report: &ThreatReport) -> bool {
        !report.is_clean() && report.risk_score >= self.risk_threshold
    }

    /// Oversized-payload finding, if `len` exceeds the input limit
    pub fn check_size(&self, len: usize) -> Option<DetectedThreat> {
        (len > self.max_input_bytes)
            .then(|| DetectedThreat::new(&OVERSIZED_PAYLOAD, ROOT_FIELD, ""))
    }

    /// Normalize and scan a single string
    pub fn scan(&self, input: &str) -> Result<ThreatReport> {
        if let Some(threat) = self.check_size(input.len()) {
            return Ok(ThreatReport::from_threats(vec![threat]));
        }
        let deadline = Deadline::new(self.timeout);
        let normalized = self.normalizer.normalize_str(input);
        let mut threats = Vec::new();
        self.scan_text(&normalized, ROOT_FIELD, "", &deadline, &mut threats)?;
        Ok(ThreatReport::from_threats(threats))
    }

    /// Scan an already-normalized string
    pub fn scan_normalized(&self, normalized: &Normalized) -> Result<ThreatReport> {
        let deadline = Deadline::new(self.timeout);
        let mut threats = Vec::new();
        self.scan_text(normalized, ROOT_FIELD, "", &deadline, &mut threats)?;
        Ok(ThreatReport::from_threats(threats))
    }

    /// Score a whole query: structure of `raw` plus every normalized leaf.
    pub fn score(&self, raw: &Value, leaves: &[NormalizedLeaf]) -> Result<ThreatReport> {
        self.score_with_deadline(raw, leaves, &Deadline::new(self.timeout))
    }

    /// Score a whole query against an externally started deadline.
    pub fn score_with_deadline(
        &self,
        raw: &Value,
        leaves: &[NormalizedLeaf],
        deadline: &Deadline,
    ) -> Result<ThreatReport> {
        let mut threats = Vec::new();

        match raw {
            Value::Object(map) => {
                for (key, child) in map {
                    self.walk_structure(key, key, 1, 0, Some(key), child, deadline, &mut threats)?;
                }
            },
            other => self.walk_structure(ROOT_FIELD, "", 0, 0, None, other, deadline, &mut threats)?,
        }

        for leaf in leaves {
            self.scan_text(&leaf.text, &leaf.field, &leaf.path, deadline, &mut threats)?;
        }

        dedup(&mut threats);
        tracing::debug!(
            threats = threats.len(),
            elapsed_us = deadline.elapsed().as_micros() as u64,
            "Scored query"
        );
        Ok(ThreatReport::from_threats(threats))
    }

    /// Structural checks. `key` is the raw key leading to `value` (None at
    /// the root or inside arrays).
    #[allow(clippy::too_many_arguments)]
    fn walk_structure(
        &self,
        field: &str,
        path: &str,
        depth: usize,
        logical_depth: usize,
        key: Option<&str>,
        value: &Value,
        deadline: &Deadline,
        out: &mut Vec<DetectedThreat>,
    ) -> Result<()> {
        deadline.check(field)?;

        let mut logical_depth = logical_depth;
        if let Some(key) = key {
            let canonical = self.normalizer.normalize_str(key).canonical;
            if canonical.starts_with('$') {
                let signature = if canonical == "$where" {
                    &WHERE_KEY
                } else {
                    &OPERATOR_KEY
                };
                out.push(DetectedThreat::new(signature, field, path));

                if LOGICAL_OPERATORS.contains(&canonical.as_str()) {
                    logical_depth += 1;
                    if logical_depth > MAX_LOGICAL_DEPTH {
                        out.push(DetectedThreat::new(&LOGICAL_CHAIN, field, path));
                    }
                }

                if canonical == "$regex" {
                    if let Value::String(pattern) = value {
                        let pattern = self.normalizer.normalize_str(pattern).canonical;
                        if complexity::analyze(&pattern).is_dangerous() {
                            out.push(DetectedThreat::new(&REGEX_OPERATOR_REDOS, field, path));
                        }
                    }
                }
            }
            if canonical.contains('.') {
                out.push(DetectedThreat::new(&DOTTED_KEY, field, path));
            }
        }

        if depth > self.max_depth {
            out.push(DetectedThreat::new(&EXCESSIVE_DEPTH, field, path));
            return Ok(());
        }

        match value {
            Value::Object(map) => {
                for (child_key, child) in map {
                    self.walk_structure(
                        field,
                        &join_path(path, child_key),
                        depth + 1,
                        logical_depth,
                        Some(child_key),
                        child,
                        deadline,
                        out,
                    )?;
                }
            },
            Value::Array(items) => {
                if items.len() > self.max_array_len {
                    out.push(DetectedThreat::new(&OVERSIZED_ARRAY, field, path));
                    return Ok(());
                }
                for (i, item) in items.iter().enumerate() {
                    self.walk_structure(
                        field,
                        &join_path(path, &i.to_string()),
                        depth + 1,
                        logical_depth,
                        None,
                        item,
                        deadline,
                        out,
                    )?;
                }
            },
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {},
        }
        Ok(())
    }

    fn scan_text(
        &self,
        text: &Normalized,
        field: &str,
        path: &str,
        deadline: &Deadline,
        out: &mut Vec<DetectedThreat>,
    ) -> Result<()> {
        match text.suspicion {
            Some(Suspicion::ExpansionLimit) => {
                out.push(DetectedThreat::new(&ENCODING_EXPANSION, field, path));
            },
            Some(Suspicion::LayerLimit) => {
                out.push(DetectedThreat::new(&ENCODING_LAYER_LIMIT, field, path));
            },
            Some(Suspicion::MultiLayer) => {
                out.push(DetectedThreat::new(&MULTI_LAYER_ENCODING, field, path));
            },
            None => {},
        }

        let mut matched: HashSet<&'static str> = HashSet::new();
        for form in text.forms() {
            for (regex, signature) in COMPILED_SIGNATURES.iter() {
                deadline.check(field)?;
                if matched.contains(signature.name) {
                    continue;
                }
                if regex.is_match(form) {
                    matched.insert(signature.name);
                    out.push(DetectedThreat::new(signature, field, path));
                }
            }
        }
        Ok(())
    }
}

/// Keep the first occurrence of each (signature, path)
fn dedup(threats: &mut Vec<DetectedThreat>) {
    let mut seen = HashSet::new();
    threats.retain(|t| seen.insert((t.name, t.path.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score(raw: &Value) -> Result<ThreatReport> {
        let detector = PatternDetector::new();
        let leaves = Normalizer::new().normalize_value(raw);
        detector.score(raw, &leaves)
    }

    #[test]
    fn test_clean_query() {
        let report = score(&json!({"face_shape": "oval", "limit": 20})).unwrap();
        assert!(report.is_clean());
        assert!(report.risk_score.abs() < f32::EPSILON);
    }

    #[test]
    fn test_operator_key_attributed_to_field() {
        let report = score(&json!({"face_shape": {"$ne": null}})).unwrap();
        let top = report.top().unwrap();
        assert_eq!(top.name, "operator_key");
        assert_eq!(top.field, "face_shape");
        assert!(PatternDetector::new().should_reject(&report));
    }

    #[test]
    fn test_encoded_operator_key() {
        let report = score(&json!({"price": {"%24gt": 0}})).unwrap();
        assert!(report.signature_names().contains(&"operator_key"));
    }

    #[test]
    fn test_where_key() {
        let report = score(&json!({"$where": "this.price < 10"})).unwrap();
        let names = report.signature_names();
        assert!(names.contains(&"where_key"));
        assert!(names.contains(&"js_this_access"));
        assert!((report.risk_score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_logical_chain() {
        let raw = json!({"$or": [{"$and": [{"$or": [{"sku": "A"}]}]}]});
        let report = score(&raw).unwrap();
        assert!(report.signature_names().contains(&"logical_chain"));
    }

    #[test]
    fn test_regex_operator_redos() {
        let report = score(&json!({"brand": {"$regex": "^(a+)+$"}})).unwrap();
        assert!(report.has_category(ThreatCategory::ReDoS));
    }

    #[test]
    fn test_depth_and_array_limits() {
        let mut deep = json!("leaf");
        for _ in 0..20 {
            deep = json!({ "x": deep });
        }
        let report = score(&json!({ "search": deep })).unwrap();
        assert!(report.signature_names().contains(&"excessive_depth"));

        let wide: Vec<u32> = (0..500).collect();
        let report = score(&json!({ "face_shape": wide })).unwrap();
        assert!(report.signature_names().contains(&"oversized_array"));
    }

    #[test]
    fn test_zero_budget_fails_closed() {
        let detector = PatternDetector::new().with_timeout(Duration::ZERO);
        let err = detector.scan("harmless").unwrap_err();
        assert!(matches!(err, GuardError::Timeout { .. }));
        assert!(err.is_security());
    }

    #[test]
    fn test_oversized_payload_skips_regexes() {
        let mut detector = PatternDetector::new();
        detector.max_input_bytes = 16;
        let report = detector.scan(&"a".repeat(64)).unwrap();
        assert_eq!(report.signature_names(), vec!["oversized_payload"]);
    }

    #[test]
    fn test_aggregate_score() {
        let a = DetectedThreat::new(&MULTI_LAYER_ENCODING, "f", "f");
        let b = DetectedThreat::new(&MULTI_LAYER_ENCODING, "g", "g");
        // Same signature twice counts once
        assert!((aggregate_score(&[a.clone(), b]) - 0.5).abs() < 1e-6);

        let c = DetectedThreat::new(&DOTTED_KEY, "f", "f");
        assert!((aggregate_score(&[a, c]) - 0.9).abs() < 1e-6);
    }
}
