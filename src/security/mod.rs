//! Threat detection for catalogue queries.
//!
//! This module scores normalized client input against a static registry of
//! threat signatures and produces an aggregate risk score.
//!
//! # Threat Categories
//!
//! | Category             | Examples                                      | Severity    |
//! |----------------------|-----------------------------------------------|-------------|
//! | `SqlInjection`       | `'; DROP TABLE`, `' OR '1'='1`, `UNION SELECT`| High        |
//! | `NoSqlInjection`     | `$where`, `$ne` keys, `{"$gt": ""}` strings   | High-Crit   |
//! | `ScriptInjection`    | `function(){}`, `this.price`, `while(true)`   | High        |
//! | `EncodingBypass`     | null bytes, deep or exploding encodings       | Medium-High |
//! | `ReDoS`              | `(a+)+`, `(a\|aa)*`, `a{100000}`              | High        |
//! | `ResourceExhaustion` | oversized payloads, deep nesting, huge arrays | High        |
//!
//! # Detection Methods
//!
//! ## Regex Signatures
//!
//! Compiled once at startup and evaluated against every normalized form of
//! every key and string value.
//!
//! ## Structural Signatures
//!
//! Raised from the shape of the query: `$`-prefixed or dotted keys, chained
//! logical operators, `$regex` values with super-linear matching, nesting
//! depth, array lengths and payload size.
//!
//! # Scoring
//!
//! The aggregate risk score is the probabilistic OR of the severities of the
//! distinct signatures that matched. Input is rejected when the score reaches
//! the configured threshold (default 0.7).
//!
//! # Timeouts
//!
//! Every evaluation runs under a wall-clock [`Deadline`] (default 50ms).
//! Expiry yields [`GuardError::Timeout`](crate::GuardError::Timeout), which
//! callers must treat as a security violation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use frameguard::security::PatternDetector;
//!
//! let detector = PatternDetector::new();
//!
//! let report = detector.scan("%27%3B%20DROP%20TABLE%3B%20--").unwrap();
//! assert!(detector.should_reject(&report));
//! ```

pub mod complexity;
mod detector;
mod patterns;

pub use detector::{aggregate_score, Deadline, DetectedThreat, PatternDetector, ThreatReport};
pub use patterns::{
    all_signatures, match_signatures, Matcher, ThreatCategory, ThreatSignature, NOSQL_SIGNATURES,
    REDOS_SIGNATURES, SCRIPT_SIGNATURES, SQL_SIGNATURES, STRUCTURAL_SIGNATURES,
};

/// Signature registry version
pub const SIGNATURES_VERSION: &str = "1.2.0";
