//! Injection payload tests.
//!
//! Known attack strings, in plain and obfuscated form, must be rejected by
//! the pipeline with a security error that names the offending field.

use std::time::{Duration, Instant};

use frameguard::security::ThreatCategory;
use frameguard::{GuardError, PatternDetector, Pipeline};
use proptest::prelude::*;
use serde_json::{json, Value};

fn security_field(pipeline: &Pipeline, query: &Value) -> String {
    match pipeline.process(query) {
        Err(GuardError::SecurityViolation { field, .. }) => field,
        other => panic!("expected security violation for {query}, got {other:?}"),
    }
}

/// URL-encoded stacked DROP TABLE
#[test]
fn test_url_encoded_drop_table() {
    let detector = PatternDetector::new();
    let report = detector.scan("%27%3B%20DROP%20TABLE%3B%20--").unwrap();

    assert!(detector.should_reject(&report));
    assert!(report.has_category(ThreatCategory::SqlInjection));

    let pipeline = Pipeline::new();
    let field = security_field(&pipeline, &json!({"search": "%27%3B%20DROP%20TABLE%3B%20--"}));
    assert_eq!(field, "search");
}

/// Operator injection through a nested document
#[test]
fn test_not_equal_operator_injection() {
    let pipeline = Pipeline::new();
    let field = security_field(&pipeline, &json!({"face_shape": {"$ne": null}}));
    assert_eq!(field, "face_shape");
}

/// `$where` spelled in every encoding the normalizer peels
#[test]
fn test_encoded_where_variants() {
    let pipeline = Pipeline::new();
    for payload in [
        "$where",
        "%24where",
        "%2524where",
        "&#36;where",
        "\\x24where",
        "\\u0024where",
        "JHdoZXJl", // base64
        "\u{FF04}where",
    ] {
        let field = security_field(&pipeline, &json!({ "search": payload }));
        assert_eq!(field, "search", "{payload}");
    }
}

/// Operator keys hidden behind encoding or fullwidth characters
#[test]
fn test_obfuscated_operator_keys() {
    let pipeline = Pipeline::new();
    for key in ["$gt", "%24gt", "\u{FF04}gt", "$\u{200B}gt"] {
        let query = json!({ "price": { key: 0 } });
        assert_eq!(security_field(&pipeline, &query), "price", "{key}");
    }
}

#[test]
fn test_where_key_at_root() {
    let pipeline = Pipeline::new();
    let err = pipeline
        .process(&json!({"$where": "this.price < 10"}))
        .unwrap_err();
    match err {
        GuardError::SecurityViolation { signature, score, .. } => {
            assert_eq!(signature, "where_key");
            assert!((score - 1.0).abs() < f32::EPSILON);
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_javascript_injection() {
    let pipeline = Pipeline::new();
    for payload in [
        "function() { return this.price < 10 }",
        "() => true",
        "'; while(true){}; '",
        "require('child_process')",
        "x' || new Date() - 0",
    ] {
        let err = pipeline.process(&json!({ "search": payload })).unwrap_err();
        assert!(err.is_security(), "{payload}: {err}");
    }
}

#[test]
fn test_timing_payloads() {
    let pipeline = Pipeline::new();
    for payload in ["'; sleep(5000); '", "1; WAITFOR DELAY '0:0:5'", "pg_sleep(10)"] {
        let err = pipeline.process(&json!({ "search": payload })).unwrap_err();
        assert!(err.is_security(), "{payload}");
    }
}

#[test]
fn test_logical_operator_chain() {
    let pipeline = Pipeline::new();
    let query = json!({"$or": [{"$and": [{"$or": [{"sku": "ABC-1"}]}]}]});
    let result = pipeline.evaluate(&query);
    assert!(!result.safe);
    assert!(result.signatures.iter().any(|t| t.name == "logical_chain"));
}

#[test]
fn test_regex_operator_with_catastrophic_pattern() {
    let pipeline = Pipeline::new();
    let result = pipeline.evaluate(&json!({"brand": {"$regex": "^(a+)+$"}}));
    assert!(!result.safe);
    assert!(result
        .signatures
        .iter()
        .any(|t| t.category == ThreatCategory::ReDoS));
}

/// Catastrophic-backtracking payload is judged quickly and rejected
#[test]
fn test_redos_payload_completes_quickly() {
    let pipeline = Pipeline::new();
    let payload = format!("(a+)+{}!", "a".repeat(4_000));
    let query = json!({ "search": payload });

    // Warm up lazily initialized state
    let _ = pipeline.evaluate(&json!({"search": "warm up"}));

    let started = Instant::now();
    let result = pipeline.evaluate(&query);
    let elapsed = started.elapsed();

    assert!(!result.safe);
    assert!(result.rejection.as_ref().is_some_and(GuardError::is_security));
    assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");
}

#[test]
fn test_oversized_payload_rejected_before_matching() {
    let pipeline = Pipeline::new();
    let result = pipeline.evaluate(&json!({ "search": "a".repeat(20_000) }));

    assert!(!result.safe);
    let names: Vec<_> = result.signatures.iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["oversized_payload"]);
}

#[test]
fn test_excessive_nesting() {
    let mut deep = json!("oval");
    for _ in 0..12 {
        deep = json!({ "a": deep });
    }
    let result = Pipeline::new().evaluate(&json!({ "face_shape": deep }));
    assert!(!result.safe);
    assert!(result.signatures.iter().any(|t| t.name == "excessive_depth"));
}

/// Unicode spellings of SQL keywords flag the same signatures as ASCII
#[test]
fn test_unicode_equivalent_keywords() {
    let detector = PatternDetector::new();
    let ascii = detector.scan("'; DROP TABLE users; --").unwrap();

    for variant in [
        "\u{FF07}\u{FF1B} \u{FF24}\u{FF32}\u{FF2F}\u{FF30} \u{FF34}\u{FF21}\u{FF22}\u{FF2C}\u{FF25} users\u{FF1B} \u{FF0D}\u{FF0D}",
        "'; D\u{200B}ROP TA\u{200D}BLE users; --",
        "'; DR\u{041E}P \u{0422}ABLE users; --",
        "\u{2019}; DROP\u{00A0}TABLE users; --",
    ] {
        let report = detector.scan(variant).unwrap();
        assert_eq!(report.signature_names(), ascii.signature_names(), "{variant}");
    }
}

proptest! {
    /// Zero-width characters anywhere in a keyword never hide it
    #[test]
    fn prop_zero_width_insertion_detected(pos in 0usize..24, zw in prop::sample::select(vec!['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'])) {
        let plain = "'; DROP TABLE products; --";
        let mut chars: Vec<char> = plain.chars().collect();
        chars.insert(pos.min(chars.len()), zw);
        let obfuscated: String = chars.into_iter().collect();

        let detector = PatternDetector::new();
        let expected = detector.scan(plain).unwrap().signature_names();
        let actual = detector.scan(&obfuscated).unwrap().signature_names();
        prop_assert_eq!(actual, expected);
    }

    /// Case changes never hide a keyword
    #[test]
    fn prop_keyword_case_insensitive(mask in any::<u32>()) {
        let varied: String = "union select password from users"
            .chars()
            .enumerate()
            .map(|(i, c)| if mask & (1 << (i % 32)) != 0 { c.to_ascii_uppercase() } else { c })
            .collect();
        let report = PatternDetector::new().scan(&format!("1 {varied}")).unwrap();
        prop_assert!(report.signature_names().contains(&"sql_union_select"));
    }
}
