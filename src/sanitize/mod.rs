//! Structural query sanitization.
//!
//! Walks a query recursively and removes what the storage layer must never
//! see:
//!
//! - keys whose canonical form starts with `$` (unless allow-listed),
//! - top-level fields that have no validation rule,
//!
//! and coerces numeric strings of numeric fields (`"20"` for `limit`) into
//! numbers, re-validating the result. Every change is reported as an
//! [`Alteration`]. Sanitizing an already sanitized query changes nothing.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::PipelineConfig;
use crate::error::{GuardError, Result};
use crate::normalize::{join_path, Normalizer};
use crate::validation::{type_name, FieldValidator, RuleSet};

/// One change made by the sanitizer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alteration {
    /// A `$`-prefixed key was dropped
    OperatorRemoved {
        /// Dotted path of the dropped key
        path: String,
    },
    /// A field without a validation rule was dropped
    UnknownFieldRemoved {
        /// Field name
        path: String,
    },
    /// A numeric string was converted to a number
    Coerced {
        /// Field name
        path: String,
        /// Original value
        from: Value,
        /// Coerced value
        to: Value,
    },
}

impl Alteration {
    /// Path the alteration applies to
    pub fn path(&self) -> &str {
        match self {
            Alteration::OperatorRemoved { path }
            | Alteration::UnknownFieldRemoved { path }
            | Alteration::Coerced { path, .. } => path,
        }
    }
}

/// Cleaned query plus the changes made
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizedQuery {
    /// Cleaned query object
    pub value: Map<String, Value>,
    /// Changes, in walk order
    pub alterations: Vec<Alteration>,
}

impl SanitizedQuery {
    /// Whether the input came through untouched
    pub fn is_unchanged(&self) -> bool {
        self.alterations.is_empty()
    }
}

/// Recursive operator and field stripper
#[derive(Debug, Clone)]
pub struct QuerySanitizer {
    validator: FieldValidator,
    normalizer: Normalizer,
    allowed_operators: HashSet<String>,
}

impl QuerySanitizer {
    /// Create sanitizer over a rule set with no allowed operators
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self::from_config(rules, &PipelineConfig::default())
    }

    /// Create sanitizer from pipeline configuration
    pub fn from_config(rules: Arc<RuleSet>, config: &PipelineConfig) -> Self {
        Self {
            validator: FieldValidator::new(rules),
            normalizer: Normalizer::from_config(config),
            allowed_operators: config.allowed_operators.iter().cloned().collect(),
        }
    }

    /// Allow an operator key (e.g. `$in`) to survive sanitization
    pub fn with_allowed_operator(mut self, operator: impl Into<String>) -> Self {
        self.allowed_operators.insert(operator.into());
        self
    }

    /// Sanitize a query object.
    ///
    /// Fails only if the root is not an object or a coerced value does not
    /// validate.
    pub fn sanitize(&self, query: &Value) -> Result<SanitizedQuery> {
        let Value::Object(map) = query else {
            return Err(GuardError::NotAnObject(type_name(query)));
        };

        let mut alterations = Vec::new();
        let mut cleaned = Map::new();

        for (key, value) in map {
            if self.is_operator(key) {
                if !self.is_allowed(key) {
                    alterations.push(Alteration::OperatorRemoved { path: key.clone() });
                    continue;
                }
            } else if !self.validator.rules().contains(key) {
                alterations.push(Alteration::UnknownFieldRemoved { path: key.clone() });
                continue;
            }

            let mut value = self.strip(key, value, &mut alterations);
            if let Some(coerced) = self.validator.coerce(key, &value)? {
                alterations.push(Alteration::Coerced {
                    path: key.clone(),
                    from: value,
                    to: coerced.clone(),
                });
                value = coerced;
            }
            cleaned.insert(key.clone(), value);
        }

        if !alterations.is_empty() {
            tracing::debug!(alterations = alterations.len(), "Sanitized query");
        }

        Ok(SanitizedQuery {
            value: cleaned,
            alterations,
        })
    }

    fn strip(&self, path: &str, value: &Value, alterations: &mut Vec<Alteration>) -> Value {
        match value {
            Value::Object(map) => {
                let mut cleaned = Map::new();
                for (key, child) in map {
                    let child_path = join_path(path, key);
                    if self.is_operator(key) && !self.is_allowed(key) {
                        alterations.push(Alteration::OperatorRemoved { path: child_path });
                        continue;
                    }
                    cleaned.insert(key.clone(), self.strip(&child_path, child, alterations));
                }
                Value::Object(cleaned)
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.strip(&join_path(path, &i.to_string()), item, alterations))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    fn is_operator(&self, key: &str) -> bool {
        key.starts_with('$') || self.normalizer.normalize_str(key).canonical.starts_with('$')
    }

    fn is_allowed(&self, key: &str) -> bool {
        // Allow-list entries match the literal key only; encoded spellings are dropped
        self.allowed_operators.contains(key)
    }
}
