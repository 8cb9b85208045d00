//! # Frameguard - Query Validation Gate
//!
//! Input validation and sanitization for the eyewear catalogue API. Sits
//! between the API layer and the document store and makes sure that no
//! client-supplied filter reaches storage before it has been normalized,
//! scored for injection attempts, validated field by field and stripped of
//! query operators.
//!
//! ## Features
//!
//! - **Normalization**: Unicode NFKC, invisible-character removal, lookalike
//!   folding, and up to five layers of URL / HTML-entity / hex / Base64 decoding
//! - **Threat detection**: SQL and NoSQL injection, JavaScript injection,
//!   encoding bypasses, ReDoS payloads and oversized input, under a hard
//!   wall-clock budget
//! - **Whitelist validation**: per-field enums, formats and numeric ranges;
//!   unknown fields are rejected, values are never clamped
//! - **Sanitization**: recursive removal of `$` operators and numeric coercion
//! - **Audit trail**: bounded drop-oldest queue with pluggable sinks
//!
//! ### Architecture
//!
//! ```text
//!  API layer                     frameguard                      storage
//!     |                              |                              |
//!     |-- serde_json::Value -------->|                              |
//!     |                       Normalizer                            |
//!     |                       PatternDetector --(threat)--> AuditLog
//!     |                       FieldValidator                        |
//!     |                       QuerySanitizer                        |
//!     |<-- SafeQuery / GuardError ---|                              |
//!     |-- SafeQuery ------------------------------------------------>|
//! ```
//!
//! ### State Machine
//!
//! ```text
//!     [Received] ──> [Normalized] ──> [Scored] ──┬──> [Rejected]
//!                                                │        ^
//!                                                v        │ validation /
//!                                          [Validated] ───┘ coercion error
//!                                                │
//!                                                v
//!                                          [Sanitized] ──> [Accepted]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use frameguard::{GuardError, Pipeline};
//! use serde_json::json;
//!
//! let pipeline = Pipeline::new();
//!
//! // Whitelisted query
//! let query = pipeline.process(&json!({"face_shape": "oval", "max_price": "250"}))?;
//! for (field, value) in query.filter() {
//!     println!("{field} = {value:?}");
//! }
//!
//! // Operator injection
//! match pipeline.process(&json!({"face_shape": {"$ne": null}})) {
//!     Err(GuardError::SecurityViolation { field, signature, .. }) => {
//!         println!("rejected {field}: {signature}");
//!     },
//!     _ => unreachable!(),
//! }
//! ```
//!
//! ## Modules
//!
//! - [`normalize`]: Unicode folding and multi-layer decoding
//! - [`security`]: Threat signatures and the pattern detector
//! - [`validation`]: Field rules and the whitelist validator
//! - [`sanitize`]: Operator stripping and type coercion
//! - [`pipeline`]: The per-request state machine
//! - [`audit`]: Audit entries, queue and sinks
//! - [`stats`]: Counters and latency percentiles
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod audit;
pub mod config;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod query;
pub mod sanitize;
pub mod security;
pub mod stats;
pub mod validation;

// Re-exports for convenience
pub use audit::{
    spawn_flusher, AuditEntry, AuditFlusher, AuditLog, AuditSink, JsonLinesSink, MemorySink,
    TracingSink,
};
pub use config::Config;
pub use error::{GuardError, Result};
pub use normalize::{Normalized, Normalizer};
pub use pipeline::{Pipeline, SanitizationResult, Stage};
pub use query::{FieldValue, SafeQuery};
pub use sanitize::{Alteration, QuerySanitizer, SanitizedQuery};
pub use security::{DetectedThreat, PatternDetector, ThreatCategory, ThreatReport};
pub use stats::{PipelineStats, StatsSummary};
pub use validation::{FieldValidator, RuleKind, RuleSet, ValidationRule};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
