//! Validation rule registry.
//!
//! Rules are `'static` table entries; [`RuleSet`] compiles their patterns once
//! and is shared by reference for the life of the process.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;

/// Maximum members in a multi-valued enum field
pub const MAX_MULTI_VALUES: usize = 20;

/// Accepted type and bounds of a field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// One of a fixed set of strings; `multi` also accepts an array of them
    Enum {
        /// Allowed values
        values: &'static [&'static str],
        /// Accept an array of allowed values
        multi: bool,
    },
    /// String matching an anchored regex
    Pattern {
        /// Regex source
        regex: &'static str,
        /// Human-readable format for error messages
        hint: &'static str,
    },
    /// 24-character hexadecimal document id
    ObjectId,
    /// Decimal in `(min_exclusive, max]`
    Decimal {
        /// Exclusive lower bound
        min_exclusive: f64,
        /// Inclusive upper bound
        max: f64,
    },
    /// Integer in `[min, max]`
    Integer {
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
    },
    /// Free text up to `max_len` characters
    Text {
        /// Maximum length in characters
        max_len: usize,
    },
}

impl RuleKind {
    /// Whether string values are coerced to numbers for this kind
    pub fn is_numeric(&self) -> bool {
        matches!(self, RuleKind::Decimal { .. } | RuleKind::Integer { .. })
    }
}

/// Validation rule for one field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationRule {
    /// Field name
    pub field: &'static str,
    /// Type and bounds
    pub kind: RuleKind,
    /// Whether the field becomes part of the database filter (as opposed to
    /// paging or sorting options)
    pub queryable: bool,
    /// Description
    pub description: &'static str,
}

/// Face shapes the recommendation engine knows
pub const FACE_SHAPES: &[&str] = &[
    "oval", "round", "square", "heart", "diamond", "oblong", "triangle",
];

/// Frame materials in the catalogue
pub const FRAME_MATERIALS: &[&str] = &[
    "acetate",
    "metal",
    "titanium",
    "stainless_steel",
    "plastic",
    "tr90",
    "wood",
    "mixed",
];

/// Frame shapes in the catalogue
pub const FRAME_SHAPES: &[&str] = &[
    "aviator",
    "browline",
    "cat_eye",
    "geometric",
    "oversized",
    "rectangle",
    "rimless",
    "round",
    "square",
    "wayfarer",
];

/// Largest accepted price
pub const MAX_PRICE: f64 = 10_000.0;

/// Catalogue query rules
pub static CATALOGUE_RULES: &[ValidationRule] = &[
    ValidationRule {
        field: "face_shape",
        kind: RuleKind::Enum {
            values: FACE_SHAPES,
            multi: true,
        },
        queryable: true,
        description: "Face shape the frames are recommended for",
    },
    ValidationRule {
        field: "frame_material",
        kind: RuleKind::Enum {
            values: FRAME_MATERIALS,
            multi: true,
        },
        queryable: true,
        description: "Frame material",
    },
    ValidationRule {
        field: "frame_shape",
        kind: RuleKind::Enum {
            values: FRAME_SHAPES,
            multi: true,
        },
        queryable: true,
        description: "Frame shape",
    },
    ValidationRule {
        field: "gender",
        kind: RuleKind::Enum {
            values: &["men", "women", "unisex", "kids"],
            multi: false,
        },
        queryable: true,
        description: "Target wearer",
    },
    ValidationRule {
        field: "sku",
        kind: RuleKind::Pattern {
            regex: r"^[A-Z0-9_-]{3,20}$",
            hint: "3-20 uppercase letters, digits, '-' or '_'",
        },
        queryable: true,
        description: "Stock keeping unit",
    },
    ValidationRule {
        field: "product_id",
        kind: RuleKind::ObjectId,
        queryable: true,
        description: "Product document id",
    },
    ValidationRule {
        field: "brand",
        kind: RuleKind::Pattern {
            regex: r"^[A-Za-z0-9][A-Za-z0-9 .&-]{0,39}$",
            hint: "1-40 letters, digits, spaces, '.', '&' or '-'",
        },
        queryable: true,
        description: "Brand name",
    },
    ValidationRule {
        field: "price",
        kind: RuleKind::Decimal {
            min_exclusive: 0.0,
            max: MAX_PRICE,
        },
        queryable: true,
        description: "Exact price",
    },
    ValidationRule {
        field: "min_price",
        kind: RuleKind::Decimal {
            min_exclusive: 0.0,
            max: MAX_PRICE,
        },
        queryable: true,
        description: "Lower price bound",
    },
    ValidationRule {
        field: "max_price",
        kind: RuleKind::Decimal {
            min_exclusive: 0.0,
            max: MAX_PRICE,
        },
        queryable: true,
        description: "Upper price bound",
    },
    ValidationRule {
        field: "search",
        kind: RuleKind::Text { max_len: 100 },
        queryable: true,
        description: "Free-text product search",
    },
    ValidationRule {
        field: "limit",
        kind: RuleKind::Integer { min: 1, max: 100 },
        queryable: false,
        description: "Page size",
    },
    ValidationRule {
        field: "offset",
        kind: RuleKind::Integer { min: 0, max: 10_000 },
        queryable: false,
        description: "Page offset",
    },
    ValidationRule {
        field: "sort",
        kind: RuleKind::Enum {
            values: &["price", "-price", "name", "-name", "newest", "popularity"],
            multi: false,
        },
        queryable: false,
        description: "Sort order",
    },
];

/// A rule with its compiled pattern
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub(crate) rule: ValidationRule,
    /// `None` for non-pattern kinds, or when the pattern failed to compile
    /// (every value is then rejected)
    pub(crate) regex: Option<Regex>,
}

/// Immutable set of validation rules keyed by field name
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: BTreeMap<&'static str, CompiledRule>,
}

impl RuleSet {
    /// Compile a rule table
    pub fn new(rules: &[ValidationRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = match rule.kind {
                    RuleKind::Pattern { regex, .. } => match Regex::new(regex) {
                        Ok(r) => Some(r),
                        Err(e) => {
                            tracing::error!(field = rule.field, error = %e, "Invalid rule pattern");
                            None
                        },
                    },
                    _ => None,
                };
                (rule.field, CompiledRule { rule: *rule, regex })
            })
            .collect();
        Self { rules }
    }

    /// Rules for the eyewear catalogue API
    pub fn catalogue() -> Self {
        Self::new(CATALOGUE_RULES)
    }

    /// Rule for a field
    pub fn get(&self, field: &str) -> Option<&ValidationRule> {
        self.rules.get(field).map(|c| &c.rule)
    }

    pub(crate) fn compiled(&self, field: &str) -> Option<&CompiledRule> {
        self.rules.get(field)
    }

    /// Whether the field is whitelisted
    pub fn contains(&self, field: &str) -> bool {
        self.rules.contains_key(field)
    }

    /// All rules, ordered by field name
    pub fn iter(&self) -> impl Iterator<Item = &ValidationRule> {
        self.rules.values().map(|c| &c.rule)
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
