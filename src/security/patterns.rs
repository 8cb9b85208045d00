//! Threat signature registry.
//!
//! Regex signatures are evaluated against every normalized form of every
//! string in a query. Structural signatures are raised by the detector from
//! the shape of the query itself (operator keys, nesting, sizes) and from
//! normalizer findings.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// How a signature is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Regex over normalized text
    Regex(&'static str),
    /// Raised by structural checks in the detector
    Structural,
}

/// A threat detection signature
#[derive(Debug, Clone)]
pub struct ThreatSignature {
    /// Signature name
    pub name: &'static str,
    /// Match method
    pub matcher: Matcher,
    /// Threat category
    pub category: ThreatCategory,
    /// Severity (0.0 - 1.0)
    pub severity: f32,
    /// Description
    pub description: &'static str,
}

/// Threat categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// SQL keyword injection
    SqlInjection,
    /// Document-database operator injection
    NoSqlInjection,
    /// JavaScript/function-call injection
    ScriptInjection,
    /// Obfuscation that survives or abuses decoding
    EncodingBypass,
    /// Catastrophic-backtracking regular expressions
    ReDoS,
    /// Oversized or over-nested payloads
    ResourceExhaustion,
}

impl std::fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatCategory::SqlInjection => write!(f, "sql_injection"),
            ThreatCategory::NoSqlInjection => write!(f, "nosql_injection"),
            ThreatCategory::ScriptInjection => write!(f, "script_injection"),
            ThreatCategory::EncodingBypass => write!(f, "encoding_bypass"),
            ThreatCategory::ReDoS => write!(f, "redos"),
            ThreatCategory::ResourceExhaustion => write!(f, "resource_exhaustion"),
        }
    }
}

/// SQL injection signatures
pub static SQL_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        name: "sql_stacked_query",
        matcher: Matcher::Regex(
            r"(?i);\s*(drop|delete|insert|update|alter|create|truncate|exec(ute)?|shutdown)\b",
        ),
        category: ThreatCategory::SqlInjection,
        severity: 0.95,
        description: "Statement terminator followed by a new statement",
    },
    ThreatSignature {
        name: "sql_ddl",
        matcher: Matcher::Regex(
            r"(?i)\b(drop|truncate|alter)\s+(table|database|schema|collection|index)\b",
        ),
        category: ThreatCategory::SqlInjection,
        severity: 0.9,
        description: "Schema-destroying statement",
    },
    ThreatSignature {
        name: "sql_union_select",
        matcher: Matcher::Regex(r"(?i)\bunion\b(\s+(all|distinct))?\s+select\b"),
        category: ThreatCategory::SqlInjection,
        severity: 0.9,
        description: "UNION-based data extraction",
    },
    ThreatSignature {
        name: "sql_tautology",
        matcher: Matcher::Regex(
            r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*(=|<>|!=|like)\s*['"]?\w+"#,
        ),
        category: ThreatCategory::SqlInjection,
        severity: 0.9,
        description: "Quote breakout into an always-true condition",
    },
    ThreatSignature {
        name: "sql_numeric_tautology",
        matcher: Matcher::Regex(r"(?i)\b(or|and)\s+(\d+)\s*=\s*\d+\b"),
        category: ThreatCategory::SqlInjection,
        severity: 0.8,
        description: "Numeric always-true condition",
    },
    ThreatSignature {
        name: "sql_comment_terminator",
        matcher: Matcher::Regex(r#"(?i)['"`]\s*(--|#|/\*)"#),
        category: ThreatCategory::SqlInjection,
        severity: 0.8,
        description: "Quote breakout followed by a comment",
    },
    ThreatSignature {
        name: "sql_time_delay",
        matcher: Matcher::Regex(r"(?i)\b(sleep|pg_sleep|benchmark)\s*\(|\bwaitfor\s+delay\b"),
        category: ThreatCategory::SqlInjection,
        severity: 0.9,
        description: "Time-based blind injection",
    },
    ThreatSignature {
        name: "sql_select_from",
        matcher: Matcher::Regex(r"(?i)\bselect\s+(\*|[\w,\s]+?)\s+from\s+\w+"),
        category: ThreatCategory::SqlInjection,
        severity: 0.65,
        description: "Embedded SELECT statement",
    },
    ThreatSignature {
        name: "sql_system_objects",
        matcher: Matcher::Regex(
            r"(?i)\b(information_schema|sysobjects|syscolumns|pg_catalog|xp_cmdshell)\b",
        ),
        category: ThreatCategory::SqlInjection,
        severity: 0.9,
        description: "System catalogue or procedure access",
    },
];

/// NoSQL operator signatures (operators smuggled inside strings)
pub static NOSQL_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        name: "nosql_where",
        matcher: Matcher::Regex(r"\$where\b"),
        category: ThreatCategory::NoSqlInjection,
        severity: 1.0,
        description: "Server-side JavaScript evaluation operator",
    },
    ThreatSignature {
        name: "nosql_operator",
        matcher: Matcher::Regex(
            r"\$(ne|eq|gt|gte|lt|lte|in|nin|regex|options|exists|expr|or|and|nor|not|elemMatch|size|type|mod|text|all|jsonSchema|function|accumulator|lookup|merge|out)\b",
        ),
        category: ThreatCategory::NoSqlInjection,
        severity: 0.85,
        description: "Query operator inside a string value",
    },
    ThreatSignature {
        name: "nosql_json_operator",
        matcher: Matcher::Regex(r#"\{\s*["']?\$\w+["']?\s*:"#),
        category: ThreatCategory::NoSqlInjection,
        severity: 0.9,
        description: "Serialized operator document",
    },
    ThreatSignature {
        name: "nosql_bracket_operator",
        matcher: Matcher::Regex(r"\[\s*\$\w+\s*\]"),
        category: ThreatCategory::NoSqlInjection,
        severity: 0.9,
        description: "Query-string bracket operator (`field[$ne]=`)",
    },
    ThreatSignature {
        name: "nosql_shell_command",
        matcher: Matcher::Regex(
            r"(?i)\bdb\.\w+\.(find|insert|update|remove|delete|drop|aggregate|mapReduce)\w*\s*\(",
        ),
        category: ThreatCategory::NoSqlInjection,
        severity: 0.95,
        description: "Database shell command",
    },
];

/// JavaScript/function-call injection signatures
pub static SCRIPT_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        name: "js_function",
        matcher: Matcher::Regex(r"(?i)\bfunction\s*\w*\s*\("),
        category: ThreatCategory::ScriptInjection,
        severity: 0.85,
        description: "Function literal",
    },
    ThreatSignature {
        name: "js_arrow_function",
        matcher: Matcher::Regex(r"\(\s*\w*\s*\)\s*=>"),
        category: ThreatCategory::ScriptInjection,
        severity: 0.8,
        description: "Arrow function literal",
    },
    ThreatSignature {
        name: "js_this_access",
        matcher: Matcher::Regex(r"\bthis\.\w+"),
        category: ThreatCategory::ScriptInjection,
        severity: 0.8,
        description: "Document access from injected JavaScript",
    },
    ThreatSignature {
        name: "js_eval",
        matcher: Matcher::Regex(r"\b(eval|setTimeout|setInterval|Function|constructor)\s*\("),
        category: ThreatCategory::ScriptInjection,
        severity: 0.9,
        description: "Dynamic code evaluation",
    },
    ThreatSignature {
        name: "js_process_access",
        matcher: Matcher::Regex(r"\b(process\.(env|exit|mainModule|binding)|require\s*\()"),
        category: ThreatCategory::ScriptInjection,
        severity: 0.95,
        description: "Runtime or module access",
    },
    ThreatSignature {
        name: "js_busy_loop",
        matcher: Matcher::Regex(r"(?i)\bwhile\s*\(\s*(true|1)\s*\)|\bfor\s*\(\s*;\s*;\s*\)"),
        category: ThreatCategory::ScriptInjection,
        severity: 0.95,
        description: "Unbounded loop (timing/denial payload)",
    },
    ThreatSignature {
        name: "js_timing",
        matcher: Matcher::Regex(r"\bnew\s+Date\s*\(\s*\)\s*[-+<>]|\bDate\.now\s*\(\s*\)"),
        category: ThreatCategory::ScriptInjection,
        severity: 0.8,
        description: "Clock read used for timing inference",
    },
    ThreatSignature {
        name: "js_quote_breakout",
        matcher: Matcher::Regex(r#"['"]\s*(;|\|\||&&)\s*(return|var|let|const|if|while)\b"#),
        category: ThreatCategory::ScriptInjection,
        severity: 0.9,
        description: "String breakout into statements",
    },
    ThreatSignature {
        name: "script_tag",
        matcher: Matcher::Regex(r"(?i)<\s*script\b|\bjavascript\s*:"),
        category: ThreatCategory::ScriptInjection,
        severity: 0.9,
        description: "Script tag or javascript: URL",
    },
];

/// Obfuscation signatures that survive normalization
pub static ENCODING_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        name: "null_byte",
        matcher: Matcher::Regex(r"\x00"),
        category: ThreatCategory::EncodingBypass,
        severity: 0.95,
        description: "Null byte injection",
    },
    ThreatSignature {
        name: "control_characters",
        matcher: Matcher::Regex(r"[\x01-\x08\x0B\x0C\x0E-\x1F\x7F]"),
        category: ThreatCategory::EncodingBypass,
        severity: 0.7,
        description: "Non-printable control characters",
    },
];

/// Regex-shaped strings likely to cause catastrophic backtracking
pub static REDOS_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        name: "redos_nested_quantifier",
        matcher: Matcher::Regex(
            r"\((?:[^()\\]|\\.)*[+*](?:[^()\\]|\\.)*\)\s*(?:[+*]|\{\d+,\d*\})",
        ),
        category: ThreatCategory::ReDoS,
        severity: 0.9,
        description: "Nested quantifier such as (a+)+",
    },
    ThreatSignature {
        name: "redos_quantified_alternation",
        matcher: Matcher::Regex(
            r"\((?:[^()|\\]|\\.)+(?:\|(?:[^()|\\]|\\.)+)+\)\s*(?:[+*]|\{\d+,\d*\})",
        ),
        category: ThreatCategory::ReDoS,
        severity: 0.6,
        description: "Quantified alternation such as (a|aa)*",
    },
    ThreatSignature {
        name: "redos_large_repetition",
        matcher: Matcher::Regex(r"\{\s*\d{4,}\s*(,\s*\d*\s*)?\}"),
        category: ThreatCategory::ReDoS,
        severity: 0.8,
        description: "Very large counted repetition",
    },
];

/// `$`-prefixed key anywhere in the query
pub static OPERATOR_KEY: ThreatSignature = ThreatSignature {
    name: "operator_key",
    matcher: Matcher::Structural,
    category: ThreatCategory::NoSqlInjection,
    severity: 0.9,
    description: "Query operator used as an object key",
};

/// `$where` used as a key
pub static WHERE_KEY: ThreatSignature = ThreatSignature {
    name: "where_key",
    matcher: Matcher::Structural,
    category: ThreatCategory::NoSqlInjection,
    severity: 1.0,
    description: "Server-side JavaScript evaluation via $where",
};

/// Dotted key reaching into sub-documents
pub static DOTTED_KEY: ThreatSignature = ThreatSignature {
    name: "dotted_key",
    matcher: Matcher::Structural,
    category: ThreatCategory::NoSqlInjection,
    severity: 0.8,
    description: "Dotted path key addressing nested fields",
};

/// `$or`/`$and`/`$nor` nested deeper than two levels
pub static LOGICAL_CHAIN: ThreatSignature = ThreatSignature {
    name: "logical_chain",
    matcher: Matcher::Structural,
    category: ThreatCategory::NoSqlInjection,
    severity: 0.9,
    description: "Deeply chained logical operators",
};

/// `$regex` whose pattern can backtrack catastrophically
pub static REGEX_OPERATOR_REDOS: ThreatSignature = ThreatSignature {
    name: "regex_operator_redos",
    matcher: Matcher::Structural,
    category: ThreatCategory::ReDoS,
    severity: 0.95,
    description: "Attacker-controlled $regex with super-linear matching",
};

/// Nesting depth above the limit
pub static EXCESSIVE_DEPTH: ThreatSignature = ThreatSignature {
    name: "excessive_depth",
    matcher: Matcher::Structural,
    category: ThreatCategory::ResourceExhaustion,
    severity: 0.9,
    description: "Object/array nesting exceeds limit",
};

/// Array longer than the limit
pub static OVERSIZED_ARRAY: ThreatSignature = ThreatSignature {
    name: "oversized_array",
    matcher: Matcher::Structural,
    category: ThreatCategory::ResourceExhaustion,
    severity: 0.85,
    description: "Array length exceeds limit",
};

/// Serialized payload larger than the limit
pub static OVERSIZED_PAYLOAD: ThreatSignature = ThreatSignature {
    name: "oversized_payload",
    matcher: Matcher::Structural,
    category: ThreatCategory::ResourceExhaustion,
    severity: 1.0,
    description: "Payload exceeds maximum input size",
};

/// Decoding aborted by the size cap
pub static ENCODING_EXPANSION: ThreatSignature = ThreatSignature {
    name: "encoding_expansion",
    matcher: Matcher::Structural,
    category: ThreatCategory::EncodingBypass,
    severity: 0.9,
    description: "Decoded value exceeds size cap",
};

/// Still encoded after the maximum number of layers
pub static ENCODING_LAYER_LIMIT: ThreatSignature = ThreatSignature {
    name: "encoding_layer_limit",
    matcher: Matcher::Structural,
    category: ThreatCategory::EncodingBypass,
    severity: 0.85,
    description: "Encoding nested beyond the layer cap",
};

/// Three or more encoding layers
pub static MULTI_LAYER_ENCODING: ThreatSignature = ThreatSignature {
    name: "multi_layer_encoding",
    matcher: Matcher::Structural,
    category: ThreatCategory::EncodingBypass,
    severity: 0.5,
    description: "Value wrapped in several encoding layers",
};

/// All structural signatures
pub static STRUCTURAL_SIGNATURES: &[&ThreatSignature] = &[
    &OPERATOR_KEY,
    &WHERE_KEY,
    &DOTTED_KEY,
    &LOGICAL_CHAIN,
    &REGEX_OPERATOR_REDOS,
    &EXCESSIVE_DEPTH,
    &OVERSIZED_ARRAY,
    &OVERSIZED_PAYLOAD,
    &ENCODING_EXPANSION,
    &ENCODING_LAYER_LIMIT,
    &MULTI_LAYER_ENCODING,
];

lazy_static! {
    /// Every regex signature, compiled once
    pub static ref COMPILED_SIGNATURES: Vec<(Regex, &'static ThreatSignature)> = {
        all_signatures()
            .filter_map(|s| match s.matcher {
                Matcher::Regex(pattern) => Regex::new(pattern).ok().map(|r| (r, s)),
                Matcher::Structural => None,
            })
            .collect()
    };
}

/// Iterate over every registered signature (regex and structural)
pub fn all_signatures() -> impl Iterator<Item = &'static ThreatSignature> {
    SQL_SIGNATURES
        .iter()
        .chain(NOSQL_SIGNATURES)
        .chain(SCRIPT_SIGNATURES)
        .chain(ENCODING_SIGNATURES)
        .chain(REDOS_SIGNATURES)
        .chain(STRUCTURAL_SIGNATURES.iter().copied())
}

/// Match content against all regex signatures
pub fn match_signatures(content: &str) -> Vec<&'static ThreatSignature> {
    COMPILED_SIGNATURES
        .iter()
        .filter(|(regex, _)| regex.is_match(content))
        .map(|(_, signature)| *signature)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(content: &str) -> Vec<&'static str> {
        match_signatures(content).iter().map(|s| s.name).collect()
    }

    #[test]
    fn test_all_regex_signatures_compile() {
        let regex_count = all_signatures()
            .filter(|s| matches!(s.matcher, Matcher::Regex(_)))
            .count();
        assert_eq!(COMPILED_SIGNATURES.len(), regex_count);
    }

    #[test]
    fn test_sql_detection() {
        assert!(names("'; DROP TABLE products; --").contains(&"sql_stacked_query"));
        assert!(names("' OR '1'='1").contains(&"sql_tautology"));
        assert!(names("1 UNION ALL SELECT password FROM users").contains(&"sql_union_select"));
        assert!(names("1; WAITFOR DELAY '0:0:5'").contains(&"sql_time_delay"));
    }

    #[test]
    fn test_nosql_detection() {
        assert!(names(r#"{"$ne": null}"#).contains(&"nosql_json_operator"));
        assert!(names("$where: sleep(100)").contains(&"nosql_where"));
        assert!(names("face_shape[$ne]=oval").contains(&"nosql_bracket_operator"));
    }

    #[test]
    fn test_script_detection() {
        assert!(names("function() { return this.price < 1 }").contains(&"js_function"));
        assert!(names("'; while(true){} '").contains(&"js_busy_loop"));
        assert!(names("require('child_process')").contains(&"js_process_access"));
    }

    #[test]
    fn test_redos_detection() {
        assert!(names("^(a+)+$").contains(&"redos_nested_quantifier"));
        assert!(names("(a|aa)*").contains(&"redos_quantified_alternation"));
    }

    #[test]
    fn test_safe_catalogue_values() {
        for content in [
            "oval",
            "ABC-123",
            "507f1f77bcf86cd799439011",
            "blue aviator sunglasses",
            "Ray-Ban & Oakley",
            "cat-eye frames for women",
        ] {
            assert!(match_signatures(content).is_empty(), "{content}");
        }
    }

    #[test]
    fn test_severity_scores() {
        for signature in all_signatures() {
            assert!(signature.severity > 0.0 && signature.severity <= 1.0);
        }
    }
}
