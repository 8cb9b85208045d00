//! Per-request validation pipeline.
//!
//! Wires the normalizer, detector, validator and sanitizer into one state
//! machine:
//!
//! ```text
//! RECEIVED ─▶ NORMALIZED ─▶ SCORED ─┬─▶ REJECTED
//!                                   └─▶ VALIDATED ─▶ SANITIZED ─▶ ACCEPTED
//! ```
//!
//! Threat scoring always runs before field validation, so an input that is
//! both malformed and hostile is reported as a security violation. Any error
//! on the way, including running out of evaluation time, ends in `REJECTED`.
//! Every rejection is counted in [`PipelineStats`] and recorded in the
//! [`AuditLog`].
//!
//! # Example
//!
//! ```rust,ignore
//! use frameguard::Pipeline;
//! use serde_json::json;
//!
//! let pipeline = Pipeline::new();
//!
//! let query = pipeline.process(&json!({"face_shape": "oval", "limit": 20}))?;
//! assert_eq!(query.len(), 2);
//!
//! let err = pipeline.process(&json!({"face_shape": {"$ne": null}})).unwrap_err();
//! assert!(err.is_security());
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::audit::{AuditEntry, AuditLog, AuditReason};
use crate::config::{Config, PipelineConfig};
use crate::error::{GuardError, Result};
use crate::normalize::{LeafRole, Normalizer, ROOT_FIELD};
use crate::query::{FieldValue, SafeQuery};
use crate::sanitize::{Alteration, QuerySanitizer};
use crate::security::{Deadline, DetectedThreat, PatternDetector, ThreatReport};
use crate::stats::{Outcome, PipelineStats};
use crate::validation::{type_name, FieldValidator, RuleSet};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Input accepted for evaluation
    Received,
    /// Keys and string values normalized
    Normalized,
    /// Threat score computed
    Scored,
    /// Terminal: input refused
    Rejected,
    /// Every field passed its rule
    Validated,
    /// Operators stripped and numbers coerced
    Sanitized,
    /// Terminal: safe query produced
    Accepted,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::Normalized => "NORMALIZED",
            Stage::Scored => "SCORED",
            Stage::Rejected => "REJECTED",
            Stage::Validated => "VALIDATED",
            Stage::Sanitized => "SANITIZED",
            Stage::Accepted => "ACCEPTED",
        };
        f.write_str(name)
    }
}

/// Outcome of evaluating one query
#[derive(Debug, Serialize)]
pub struct SanitizationResult {
    /// Cleaned query (`None` if rejected)
    pub value: Option<Value>,
    /// Every signature that matched, including ones below the threshold
    pub signatures: Vec<DetectedThreat>,
    /// Whether the query may be used. `false` means reject, never substitute.
    pub safe: bool,
    /// Aggregate risk score
    pub risk_score: f32,
    /// Changes made by the sanitizer
    pub alterations: Vec<Alteration>,
    /// Stage the evaluation ended in
    pub stage: Stage,
    /// Why the query was rejected
    #[serde(serialize_with = "serialize_rejection")]
    pub rejection: Option<GuardError>,
    #[serde(skip)]
    query: Option<SafeQuery>,
}

impl SanitizationResult {
    fn received() -> Self {
        Self {
            value: None,
            signatures: Vec::new(),
            safe: false,
            risk_score: 0.0,
            alterations: Vec::new(),
            stage: Stage::Received,
            rejection: None,
            query: None,
        }
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!(from = %self.stage, to = %stage, "Pipeline stage");
        self.stage = stage;
    }

    fn reject(mut self, err: GuardError) -> Self {
        self.advance(Stage::Rejected);
        self.safe = false;
        self.value = None;
        self.query = None;
        self.rejection = Some(err);
        self
    }

    /// The typed query, or the rejection error
    pub fn into_query(self) -> Result<SafeQuery> {
        match (self.rejection, self.query) {
            (Some(err), _) => Err(err),
            (None, Some(query)) => Ok(query),
            (None, None) => Err(GuardError::validation(ROOT_FIELD, "query was not accepted")),
        }
    }

    /// The typed query, if accepted
    pub fn query(&self) -> Option<&SafeQuery> {
        self.query.as_ref()
    }
}

fn serialize_rejection<S: Serializer>(
    rejection: &Option<GuardError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match rejection {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Validation gate between the API layer and storage
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    rules: Arc<RuleSet>,
    normalizer: Normalizer,
    detector: PatternDetector,
    validator: FieldValidator,
    sanitizer: QuerySanitizer,
    stats: Arc<PipelineStats>,
    audit: Arc<AuditLog>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::build(&Config::default(), Arc::new(RuleSet::catalogue()))
    }
}

impl Pipeline {
    /// Create pipeline with default configuration and catalogue rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Create pipeline from configuration (validated first)
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(RuleSet::catalogue())))
    }

    fn build(config: &Config, rules: Arc<RuleSet>) -> Self {
        let pipeline: &PipelineConfig = &config.pipeline;
        Self {
            normalizer: Normalizer::from_config(pipeline),
            detector: PatternDetector::from_config(pipeline),
            validator: FieldValidator::new(rules.clone()),
            sanitizer: QuerySanitizer::from_config(rules.clone(), pipeline),
            rules,
            config: pipeline.clone(),
            stats: Arc::new(PipelineStats::new()),
            audit: Arc::new(AuditLog::from_config(&config.audit)),
        }
    }

    /// Use a different rule set
    pub fn with_rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.validator = FieldValidator::new(rules.clone());
        self.sanitizer = QuerySanitizer::from_config(rules.clone(), &self.config);
        self.rules = rules;
        self
    }

    /// Use a custom detector
    pub fn with_detector(mut self, detector: PatternDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Use a shared audit log
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Active rule set
    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Threat detector
    pub fn detector(&self) -> &PatternDetector {
        &self.detector
    }

    /// Statistics
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Audit queue
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Run a query through every stage. Never panics; the returned result
    /// records the final stage and, if rejected, why.
    pub fn evaluate(&self, query: &Value) -> SanitizationResult {
        let started = Instant::now();
        let result = self.run(query);

        let outcome = match &result.rejection {
            None => Outcome::Accepted,
            Some(GuardError::Timeout { .. }) => Outcome::TimedOut,
            Some(err) if err.is_security() => Outcome::RejectedSecurity,
            Some(_) => Outcome::RejectedValidation,
        };
        self.stats.record(outcome, started.elapsed());
        self.stats.record_alterations(result.alterations.len());

        if let Some(err) = &result.rejection {
            tracing::warn!(
                stage = %result.stage,
                risk_score = result.risk_score,
                error = %err,
                "Query rejected"
            );
        }
        result
    }

    /// Run a query through every stage, returning the typed query or the
    /// rejection
    pub fn process(&self, query: &Value) -> Result<SafeQuery> {
        self.evaluate(query).into_query()
    }

    /// Check a single typed value arriving outside a query map (path
    /// segment, header). Goes through the same stages as a one-field query.
    pub fn check_text(&self, field: &str, value: &str) -> Result<FieldValue> {
        let mut map = Map::new();
        map.insert(field.to_string(), Value::String(value.to_string()));
        let query = self.process(&Value::Object(map))?;
        query
            .get(field)
            .cloned()
            .ok_or_else(|| GuardError::validation(field, "value removed by sanitizer"))
    }

    fn run(&self, query: &Value) -> SanitizationResult {
        let mut result = SanitizationResult::received();

        let Value::Object(map) = query else {
            let err = GuardError::NotAnObject(type_name(query));
            self.audit_failure(AuditReason::ValidationFailure, ROOT_FIELD, "not_an_object", query, &err);
            return result.reject(err);
        };

        // Size first: nothing else runs on an oversized payload
        let size = serde_json::to_string(query).map_or(usize::MAX, |s| s.len());
        if let Some(threat) = self.detector.check_size(size) {
            let report = ThreatReport {
                risk_score: threat.severity,
                threats: vec![threat],
            };
            return self.reject_threats(result, report, map);
        }

        let deadline = Deadline::new(self.detector.timeout);
        let mut leaves = self.normalizer.normalize_value(query);
        for leaf in &mut leaves {
            let literal = leaf.role == LeafRole::Value
                && map
                    .get(&leaf.field)
                    .is_some_and(|value| self.validator.is_strict_literal(&leaf.field, value));
            if literal {
                leaf.text.discard_decoded();
            }
        }
        result.advance(Stage::Normalized);

        let report = match self.detector.score_with_deadline(query, &leaves, &deadline) {
            Ok(report) => report,
            Err(err) => {
                let field = err.field().unwrap_or(ROOT_FIELD).to_string();
                let raw = map.get(&field).unwrap_or(query);
                self.audit_failure(AuditReason::Timeout, &field, "evaluation_timeout", raw, &err);
                return result.reject(err);
            },
        };
        result.advance(Stage::Scored);

        if self.detector.should_reject(&report) {
            return self.reject_threats(result, report, map);
        }
        result.risk_score = report.risk_score;
        result.signatures = report.threats;

        if let Err(err) = self.validator.validate_query(map) {
            return self.reject_invalid(result, "field_rule", query, err);
        }
        result.advance(Stage::Validated);

        let sanitized = match self.sanitizer.sanitize(query) {
            Ok(sanitized) => sanitized,
            Err(err) => return self.reject_invalid(result, "sanitized_shape", query, err),
        };
        result.alterations = sanitized.alterations;
        result.advance(Stage::Sanitized);

        match SafeQuery::from_sanitized(&sanitized.value, &self.rules) {
            Ok(safe) => {
                result.query = Some(safe);
                result.value = Some(Value::Object(sanitized.value));
                result.safe = true;
                result.advance(Stage::Accepted);
                result
            },
            Err(err) => self.reject_invalid(result, "sanitized_shape", query, err),
        }
    }

    fn reject_invalid(
        &self,
        result: SanitizationResult,
        signature: &str,
        query: &Value,
        err: GuardError,
    ) -> SanitizationResult {
        let field = err.field().unwrap_or(ROOT_FIELD).to_string();
        let raw = query.get(&field).unwrap_or(query);
        self.audit_failure(AuditReason::ValidationFailure, &field, signature, raw, &err);
        result.reject(err)
    }

    fn reject_threats(
        &self,
        mut result: SanitizationResult,
        report: ThreatReport,
        map: &Map<String, Value>,
    ) -> SanitizationResult {
        let names = report.signature_names();
        for name in &names {
            if let Some(threat) = report.threats.iter().find(|t| t.name == *name) {
                let raw = excerpt_source(map, &threat.field);
                self.audit.record(AuditEntry::threat(
                    threat,
                    report.risk_score,
                    &raw,
                    self.audit.excerpt_len(),
                ));
            }
        }

        let err = match report.top() {
            Some(top) => GuardError::SecurityViolation {
                field: top.field.clone(),
                signature: top.name.to_string(),
                score: report.risk_score,
            },
            None => GuardError::SecurityViolation {
                field: ROOT_FIELD.to_string(),
                signature: "unknown".to_string(),
                score: report.risk_score,
            },
        };
        result.risk_score = report.risk_score;
        result.signatures = report.threats;
        result.reject(err)
    }

    fn audit_failure(
        &self,
        reason: AuditReason,
        field: &str,
        signature: &str,
        raw: &Value,
        err: &GuardError,
    ) {
        self.audit.record(AuditEntry::event(
            reason,
            field,
            signature,
            &raw.to_string(),
            self.audit.excerpt_len(),
            err.to_string(),
        ));
    }
}

fn excerpt_source(map: &Map<String, Value>, field: &str) -> String {
    match map.get(field) {
        Some(value) => format!("{field}: {value}"),
        None => Value::Object(map.clone()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_accepts_clean_query_unchanged() {
        let pipeline = Pipeline::new();
        let query = json!({"face_shape": "oval", "frame_material": ["acetate"], "limit": 20});
        let result = pipeline.evaluate(&query);

        assert!(result.safe);
        assert_eq!(result.stage, Stage::Accepted);
        assert_eq!(result.value.as_ref(), Some(&query));
        assert!(result.alterations.is_empty());
        assert!(result.rejection.is_none());
        assert_eq!(pipeline.stats().total_accepted(), 1);
    }

    #[test]
    fn test_operator_injection_names_field() {
        let pipeline = Pipeline::new();
        let err = pipeline
            .process(&json!({"face_shape": {"$ne": null}}))
            .unwrap_err();
        match err {
            GuardError::SecurityViolation { field, .. } => assert_eq!(field, "face_shape"),
            other => panic!("expected security violation, got {other:?}"),
        }
        assert_eq!(pipeline.stats().rejected_security(), 1);

        let entries = pipeline.audit().drain();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.field == "face_shape"));
        assert!(entries
            .iter()
            .all(|e| e.reason == AuditReason::SecurityViolation));
    }

    #[test]
    fn test_validation_failure_is_audited() {
        let pipeline = Pipeline::new();
        let result = pipeline.evaluate(&json!({"sku": "abc-123"}));

        assert!(!result.safe);
        assert_eq!(result.stage, Stage::Rejected);
        assert!(matches!(
            result.rejection,
            Some(GuardError::Validation { ref field, .. }) if field == "sku"
        ));

        let entries = pipeline.audit().drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, AuditReason::ValidationFailure);
        assert_eq!(pipeline.stats().rejected_validation(), 1);
    }

    #[test]
    fn test_security_takes_precedence() {
        // Both malformed (lowercase) and hostile
        let err = Pipeline::new()
            .process(&json!({"sku": "x' OR '1'='1"}))
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_non_object_root() {
        let result = Pipeline::new().evaluate(&json!("face_shape=oval"));
        assert!(matches!(
            result.rejection,
            Some(GuardError::NotAnObject("string"))
        ));
    }

    #[test]
    fn test_zero_budget_fails_closed() {
        let pipeline = Pipeline::new()
            .with_detector(PatternDetector::new().with_timeout(Duration::ZERO));
        let result = pipeline.evaluate(&json!({"face_shape": "oval"}));

        assert!(!result.safe);
        assert!(matches!(result.rejection, Some(GuardError::Timeout { .. })));
        assert_eq!(pipeline.stats().timeouts(), 1);
        assert_eq!(pipeline.audit().drain()[0].reason, AuditReason::Timeout);
    }

    #[test]
    fn test_numeric_strings_coerced() {
        let result = Pipeline::new().evaluate(&json!({"limit": "25", "max_price": "199.99"}));
        assert!(result.safe);
        assert_eq!(result.value, Some(json!({"limit": 25, "max_price": 199.99})));
        assert_eq!(result.alterations.len(), 2);

        let query = result.into_query().unwrap();
        assert_eq!(query.get("limit"), Some(&FieldValue::Integer(25)));
    }

    #[test]
    fn test_check_text() {
        let pipeline = Pipeline::new();
        assert_eq!(
            pipeline.check_text("sku", "RB-3025").unwrap(),
            FieldValue::Text("RB-3025".to_string())
        );
        assert!(pipeline.check_text("sku", "rb-3025").is_err());
        assert!(pipeline
            .check_text("search", "'; DROP TABLE products; --")
            .unwrap_err()
            .is_security());
    }

    #[test]
    fn test_format_valid_values_not_decoded() {
        // Base64 and 0x-hex readings of these spell quote-then-comment payloads
        let pipeline = Pipeline::new();
        for sku in ["ICA0YCM0", "0X272D2D", "0X3B2044524F50"] {
            let query = json!({ "sku": sku });
            let result = pipeline.evaluate(&query);
            assert!(result.safe, "{sku}: {:?}", result.rejection);
            assert_eq!(result.value, Some(query));
        }
        assert!(pipeline.audit().is_empty());
    }

    #[test]
    fn test_format_invalid_values_still_decoded() {
        let err = Pipeline::new()
            .process(&json!({"sku": "0x272d2d"}))
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_late_rejections_are_audited() {
        let pipeline = Pipeline::new();
        let query = json!({"limit": 20});
        let err = GuardError::validation("limit", "unexpected string after sanitization");
        let result =
            pipeline.reject_invalid(SanitizationResult::received(), "sanitized_shape", &query, err);

        assert_eq!(result.stage, Stage::Rejected);
        let entries = pipeline.audit().drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field, "limit");
        assert_eq!(entries[0].signature, "sanitized_shape");
        assert_eq!(entries[0].reason, AuditReason::ValidationFailure);
    }

    #[test]
    fn test_result_serializes_rejection_message() {
        let result = Pipeline::new().evaluate(&json!({"limit": 500}));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["safe"], false);
        assert_eq!(json["stage"], "rejected");
        assert!(json["rejection"].as_str().unwrap().contains("limit"));
    }
}
