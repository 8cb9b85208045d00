//! Static analysis of client-supplied regular expressions.
//!
//! A `$regex` value is a pattern the database will run with a backtracking
//! engine. This module looks for the shapes that make such engines go
//! exponential or high-polynomial, without ever compiling or running the
//! pattern:
//!
//! - nested quantifiers: `(a+)+`, `(\w*)*`, `(x+){2,}`
//! - quantified alternations: `(a|aa)*`, `(.|\s)+`
//! - adjacent unbounded wildcards: `.*.*.*`
//! - huge counted repetitions: `a{10000}`

use serde::Serialize;

/// Patterns longer than this are treated as dangerous outright
pub const MAX_REGEX_LENGTH: usize = 256;

/// Counted repetitions above this bound are flagged
const MAX_REPETITION: u32 = 1000;

/// Backtracking risk profile of a regex source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegexRisk {
    /// Quantified groups that themselves contain a quantifier
    pub nested_quantifiers: usize,
    /// Quantified groups that contain an alternation
    pub quantified_alternations: usize,
    /// Longest run of adjacent `.*` / `.+`
    pub adjacent_wildcards: usize,
    /// Counted repetitions above the bound
    pub large_repetitions: usize,
    /// Source exceeds [`MAX_REGEX_LENGTH`]
    pub too_long: bool,
}

impl RegexRisk {
    /// Whether running the pattern could take super-linear time
    pub fn is_dangerous(&self) -> bool {
        self.too_long
            || self.nested_quantifiers > 0
            || self.quantified_alternations > 0
            || self.adjacent_wildcards >= 3
            || self.large_repetitions > 0
    }
}

#[derive(Default)]
struct Group {
    has_quantifier: bool,
    has_alternation: bool,
}

/// Analyse a regex source.
pub fn analyze(pattern: &str) -> RegexRisk {
    let mut risk = RegexRisk {
        too_long: pattern.chars().count() > MAX_REGEX_LENGTH,
        ..RegexRisk::default()
    };

    let chars: Vec<char> = pattern.chars().collect();
    let mut stack: Vec<Group> = vec![Group::default()];
    let mut wildcard_run = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                // Escaped atom; may still be quantified
                i += 2;
                if let Some((len, _)) = quantifier_at(&chars, i) {
                    mark_quantifier(&mut stack);
                    i += len;
                }
                wildcard_run = 0;
                continue;
            },
            '[' => {
                i = skip_class(&chars, i);
                if let Some((len, big)) = quantifier_at(&chars, i) {
                    mark_quantifier(&mut stack);
                    risk.large_repetitions += usize::from(big);
                    i += len;
                }
                wildcard_run = 0;
                continue;
            },
            '(' => {
                stack.push(Group::default());
                wildcard_run = 0;
            },
            ')' => {
                let group = if stack.len() > 1 {
                    stack.pop().unwrap_or_default()
                } else {
                    Group::default()
                };
                if let Some((len, big)) = quantifier_at(&chars, i + 1) {
                    if group.has_quantifier {
                        risk.nested_quantifiers += 1;
                    }
                    if group.has_alternation {
                        risk.quantified_alternations += 1;
                    }
                    risk.large_repetitions += usize::from(big);
                    mark_quantifier(&mut stack);
                    i += len;
                } else if group.has_quantifier {
                    // Inner quantifier still counts for the enclosing group
                    mark_quantifier(&mut stack);
                }
                wildcard_run = 0;
            },
            '|' => {
                if let Some(top) = stack.last_mut() {
                    top.has_alternation = true;
                }
                wildcard_run = 0;
            },
            _ => {
                if let Some((len, big)) = quantifier_at(&chars, i + 1) {
                    mark_quantifier(&mut stack);
                    risk.large_repetitions += usize::from(big);
                    let unbounded = matches!(chars.get(i + 1), Some('*' | '+'));
                    if c == '.' && unbounded {
                        wildcard_run += 1;
                        risk.adjacent_wildcards = risk.adjacent_wildcards.max(wildcard_run);
                    } else {
                        wildcard_run = 0;
                    }
                    i += len;
                } else {
                    wildcard_run = 0;
                }
            },
        }
        i += 1;
    }

    risk
}

fn mark_quantifier(stack: &mut [Group]) {
    if let Some(top) = stack.last_mut() {
        top.has_quantifier = true;
    }
}

/// Skip a character class starting at `start`, returning the index after `]`.
fn skip_class(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    // `[]...]` and `[^]...]` treat the first `]` literally
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Quantifier at `i`: returns its length (including a trailing lazy `?`)
/// and whether it is a large counted repetition.
fn quantifier_at(chars: &[char], i: usize) -> Option<(usize, bool)> {
    let len = match chars.get(i)? {
        '*' | '+' | '?' => 1,
        '{' => {
            let close = chars[i..].iter().position(|&c| c == '}')?;
            let body: String = chars[i + 1..i + close].iter().collect();
            let mut bounds = body.splitn(2, ',');
            let low = bounds.next()?.trim();
            if low.is_empty() || !low.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let high = bounds.next().map(str::trim);
            if let Some(h) = high {
                if !h.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
            }
            let big = std::iter::once(low)
                .chain(high)
                .filter_map(|n| n.parse::<u32>().ok())
                .any(|n| n > MAX_REPETITION)
                || low.len() > 9;
            let lazy = usize::from(chars.get(i + close + 1) == Some(&'?'));
            return Some((close + 1 + lazy, big));
        },
        _ => return None,
    };
    let lazy = usize::from(chars.get(i + 1) == Some(&'?'));
    Some((len + lazy, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_quantifiers() {
        for pattern in ["(a+)+$", "^(\\w*)*$", "(x+){2,}", "((ab)*c)+", "([a-z]+)*"] {
            let risk = analyze(pattern);
            assert!(risk.nested_quantifiers > 0, "{pattern}: {risk:?}");
            assert!(risk.is_dangerous());
        }
    }

    #[test]
    fn test_quantified_alternation() {
        let risk = analyze("^(a|aa)*$");
        assert_eq!(risk.quantified_alternations, 1);
        assert!(risk.is_dangerous());
    }

    #[test]
    fn test_adjacent_wildcards() {
        assert!(analyze(".*.*.*=.*").is_dangerous());
        assert!(!analyze(".*ray.*").is_dangerous());
    }

    #[test]
    fn test_large_repetition() {
        assert_eq!(analyze("a{10000}").large_repetitions, 1);
        assert_eq!(analyze("[0-9]{2,5000}").large_repetitions, 1);
        assert_eq!(analyze("a{2,5}").large_repetitions, 0);
    }

    #[test]
    fn test_benign_patterns() {
        for pattern in ["^ray", "ban$", "^[A-Z0-9_-]{3,20}$", "(round|oval)", "\\(a+\\)+"] {
            assert!(!analyze(pattern).is_dangerous(), "{pattern}");
        }
    }

    #[test]
    fn test_length_cap() {
        assert!(analyze(&"a".repeat(MAX_REGEX_LENGTH + 1)).too_long);
    }
}
