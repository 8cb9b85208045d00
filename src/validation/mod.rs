//! Per-field whitelist validation.
//!
//! Every top-level field of a query must have a [`ValidationRule`]; unknown
//! fields are rejected. Values are checked for type, format and range and are
//! never clamped or corrected: an out-of-range price is an error, not the
//! nearest bound.

mod rules;

use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::error::{GuardError, Result};

pub use rules::{
    RuleKind, RuleSet, ValidationRule, CATALOGUE_RULES, FACE_SHAPES, FRAME_MATERIALS,
    FRAME_SHAPES, MAX_MULTI_VALUES, MAX_PRICE,
};

/// Validates fields against a shared [`RuleSet`]
#[derive(Debug, Clone)]
pub struct FieldValidator {
    rules: Arc<RuleSet>,
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new(Arc::new(RuleSet::catalogue()))
    }
}

impl FieldValidator {
    /// Create validator over a rule set
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// The rule set in use
    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Validate every field of a query object (in key order; first failure wins)
    pub fn validate_query(&self, query: &Map<String, Value>) -> Result<()> {
        for (field, value) in query {
            self.validate_field(field, value)?;
        }
        Ok(())
    }

    /// Validate one field. Numeric fields also accept numeric strings.
    pub fn validate_field(&self, field: &str, value: &Value) -> Result<()> {
        let compiled = self
            .rules
            .compiled(field)
            .ok_or_else(|| GuardError::validation(field, "unknown field"))?;

        match compiled.rule.kind {
            RuleKind::Enum { values, multi } => match value {
                Value::Array(items) if multi => {
                    if items.is_empty() {
                        return Err(GuardError::validation(field, "empty list"));
                    }
                    if items.len() > MAX_MULTI_VALUES {
                        return Err(GuardError::validation(
                            field,
                            format!("more than {MAX_MULTI_VALUES} values"),
                        ));
                    }
                    items
                        .iter()
                        .try_for_each(|item| check_enum(field, values, item))
                },
                other => check_enum(field, values, other),
            },
            RuleKind::Pattern { hint, .. } => {
                let s = expect_str(field, value)?;
                let matches = compiled.regex.as_ref().is_some_and(|r| r.is_match(s));
                if matches {
                    Ok(())
                } else {
                    Err(GuardError::validation(field, format!("expected {hint}")))
                }
            },
            RuleKind::ObjectId => {
                let s = expect_str(field, value)?;
                if s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
                    Ok(())
                } else {
                    Err(GuardError::validation(
                        field,
                        "expected 24 hexadecimal characters",
                    ))
                }
            },
            RuleKind::Decimal { min_exclusive, max } => {
                let n = decimal_value(field, value)?;
                if n > min_exclusive && n <= max {
                    Ok(())
                } else {
                    Err(GuardError::validation(
                        field,
                        format!("{n} outside ({min_exclusive}, {max}]"),
                    ))
                }
            },
            RuleKind::Integer { min, max } => {
                let n = integer_value(field, value)?;
                if (min..=max).contains(&n) {
                    Ok(())
                } else {
                    Err(GuardError::validation(
                        field,
                        format!("{n} outside [{min}, {max}]"),
                    ))
                }
            },
            RuleKind::Text { max_len } => {
                let s = expect_str(field, value)?;
                if s.trim().is_empty() {
                    return Err(GuardError::validation(field, "empty text"));
                }
                if s.chars().count() > max_len {
                    return Err(GuardError::validation(
                        field,
                        format!("longer than {max_len} characters"),
                    ));
                }
                if s.chars().any(char::is_control) {
                    return Err(GuardError::validation(field, "control characters"));
                }
                Ok(())
            },
        }
    }

    /// Whether `value` passes an enum, pattern or ObjectId rule. Such values
    /// are matched literally; their decoded readings are not scanned.
    pub fn is_strict_literal(&self, field: &str, value: &Value) -> bool {
        let strict = self.rules.get(field).is_some_and(|rule| {
            matches!(
                rule.kind,
                RuleKind::Enum { .. } | RuleKind::Pattern { .. } | RuleKind::ObjectId
            )
        });
        strict && self.validate_field(field, value).is_ok()
    }

    /// Validate a typed string scalar
    pub fn validate_text(&self, field: &str, value: &str) -> Result<()> {
        self.validate_field(field, &Value::String(value.to_string()))
    }

    /// Coerce a numeric string for a numeric field; `None` if no coercion
    /// applies. The coerced value is validated before it is returned.
    pub fn coerce(&self, field: &str, value: &Value) -> Result<Option<Value>> {
        let Some(rule) = self.rules.get(field) else {
            return Ok(None);
        };
        let Value::String(s) = value else {
            return Ok(None);
        };
        let coerced = match rule.kind {
            RuleKind::Integer { .. } => Value::Number(integer_value(field, value)?.into()),
            RuleKind::Decimal { .. } => {
                let n = decimal_value(field, value)?;
                // Keep integral prices integral ("120" -> 120)
                match s.trim().parse::<i64>() {
                    Ok(i) => Value::Number(i.into()),
                    Err(_) => Number::from_f64(n)
                        .map(Value::Number)
                        .ok_or_else(|| GuardError::validation(field, "not a finite number"))?,
                }
            },
            _ => return Ok(None),
        };
        self.validate_field(field, &coerced)?;
        Ok(Some(coerced))
    }
}

fn check_enum(field: &str, values: &[&str], value: &Value) -> Result<()> {
    let s = expect_str(field, value)?;
    if values.contains(&s) {
        Ok(())
    } else {
        Err(GuardError::validation(
            field,
            format!("'{}' is not one of: {}", truncate(s, 32), values.join(", ")),
        ))
    }
}

fn expect_str<'a>(field: &str, value: &'a Value) -> Result<&'a str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(GuardError::validation(
            field,
            format!("expected string, got {}", type_name(other)),
        )),
    }
}

fn decimal_value(field: &str, value: &Value) -> Result<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => {
            return Err(GuardError::validation(
                field,
                format!("expected number, got {}", type_name(other)),
            ))
        },
    };
    match n {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(GuardError::validation(field, "not a finite number")),
    }
}

fn integer_value(field: &str, value: &Value) -> Result<i64> {
    let n = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        other => {
            return Err(GuardError::validation(
                field,
                format!("expected integer, got {}", type_name(other)),
            ))
        },
    };
    n.ok_or_else(|| GuardError::validation(field, "not an integer"))
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}
