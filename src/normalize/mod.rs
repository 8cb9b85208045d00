//! Input normalization.
//!
//! Produces the canonical form of client-supplied strings before pattern
//! matching, so that encoded or visually-equivalent variants of an attack
//! collapse to the plain-ASCII keyword the detector knows.
//!
//! # Steps
//!
//! 1. **Fold**: Unicode NFKC, removal of invisible format characters, Unicode
//!    whitespace to ASCII space, Cyrillic/Greek lookalikes and typographic
//!    quotes to ASCII.
//! 2. **Decode**: repeatedly peel one layer of URL, HTML-entity, hex or Base64
//!    encoding (first decoder that changes the value wins), folding after each
//!    layer, until nothing changes or the layer cap is reached.
//!
//! Every intermediate form is kept; the detector scans all of them, so a
//! spurious Base64 decode of an innocent string never hides the original.
//!
//! # Example
//!
//! ```rust,ignore
//! use frameguard::normalize::Normalizer;
//!
//! let normalized = Normalizer::new().normalize_str("%27%3B%20DROP%20TABLE%3B%20--");
//! assert_eq!(normalized.canonical, "'; DROP TABLE; --");
//! ```

mod decode;

use serde::Serialize;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::config::PipelineConfig;

pub use decode::Encoding;
use decode::DECODERS;

/// Why a normalization result should be treated with suspicion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Suspicion {
    /// Decoding would have exceeded the size cap
    ExpansionLimit,
    /// Still decodable after the maximum number of layers
    LayerLimit,
    /// Three or more layers were decoded
    MultiLayer,
}

/// Output of normalizing one string
#[derive(Debug, Clone, Serialize)]
pub struct Normalized {
    /// Folded input before any decoding
    pub folded: String,
    /// Final canonical form
    pub canonical: String,
    /// Encoding layers removed, outermost first
    pub layers: Vec<Encoding>,
    /// Invisible characters removed while folding
    pub invisible_removed: usize,
    /// Set when decoding was aborted or unusually deep
    pub suspicion: Option<Suspicion>,
    /// Decoded intermediate forms (excluding `folded`)
    intermediate: Vec<String>,
}

impl Normalized {
    /// All distinct forms: folded input, each decoded layer.
    pub fn forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.folded.as_str()).chain(self.intermediate.iter().map(String::as_str))
    }

    /// Whether decoding was aborted or unusually deep
    pub fn is_suspicious(&self) -> bool {
        self.suspicion.is_some()
    }

    /// Keep only the folded input, dropping every decoded layer.
    ///
    /// Used for values whose literal form already satisfies a strict format
    /// rule such as `^[A-Z0-9_-]{3,20}$`.
    pub fn discard_decoded(&mut self) {
        self.canonical = self.folded.clone();
        self.layers.clear();
        self.intermediate.clear();
        self.suspicion = None;
    }
}

/// Whether a normalized leaf was an object key or a string value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafRole {
    /// Object key
    Key,
    /// String value
    Value,
}

/// A normalized string found somewhere inside a query
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedLeaf {
    /// Top-level field the leaf belongs to
    pub field: String,
    /// Dotted path from the root (array indices as numbers)
    pub path: String,
    /// Key or value
    pub role: LeafRole,
    /// Normalization output
    pub text: Normalized,
}

/// Unicode and multi-layer encoding normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Maximum layers decoded
    pub max_layers: usize,
    /// Maximum length of any decoded form (bytes)
    pub max_decoded_bytes: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Normalizer {
    /// Create normalizer with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create normalizer from pipeline configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_layers: config.max_decode_layers,
            max_decoded_bytes: config.max_decoded_bytes,
        }
    }

    /// Normalize a single string
    pub fn normalize_str(&self, input: &str) -> Normalized {
        let (folded, invisible_removed) = fold(input);
        let mut current = folded.clone();
        let mut layers = Vec::new();
        let mut intermediate = Vec::new();
        let mut suspicion = None;

        // NFKC alone can expand a string many times over
        if folded.len() > self.max_decoded_bytes {
            suspicion = Some(Suspicion::ExpansionLimit);
        }

        'layers: while suspicion.is_none() && layers.len() < self.max_layers {
            for (encoding, decoder) in DECODERS {
                let Some(decoded) = decoder(&current) else {
                    continue;
                };
                if decoded.len() > self.max_decoded_bytes {
                    suspicion = Some(Suspicion::ExpansionLimit);
                    break 'layers;
                }
                let (next, _) = fold(&decoded);
                if next.len() > self.max_decoded_bytes {
                    suspicion = Some(Suspicion::ExpansionLimit);
                    break 'layers;
                }
                if next == current {
                    continue;
                }
                layers.push(*encoding);
                intermediate.push(next.clone());
                current = next;
                continue 'layers;
            }
            break;
        }

        if suspicion.is_none() && layers.len() >= self.max_layers && still_decodable(&current) {
            suspicion = Some(Suspicion::LayerLimit);
        }
        if suspicion.is_none() && layers.len() >= 3 {
            suspicion = Some(Suspicion::MultiLayer);
        }

        Normalized {
            folded,
            canonical: current,
            layers,
            invisible_removed,
            suspicion,
            intermediate,
        }
    }

    /// Normalize every key and string value in a nested structure
    pub fn normalize_value(&self, value: &Value) -> Vec<NormalizedLeaf> {
        let mut leaves = Vec::new();
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.push_key(&mut leaves, key, key, key);
                    self.walk(&mut leaves, key, key, child);
                }
            },
            other => self.walk(&mut leaves, ROOT_FIELD, "", other),
        }
        leaves
    }

    fn walk(&self, leaves: &mut Vec<NormalizedLeaf>, field: &str, path: &str, value: &Value) {
        match value {
            Value::String(s) => leaves.push(NormalizedLeaf {
                field: field.to_string(),
                path: path.to_string(),
                role: LeafRole::Value,
                text: self.normalize_str(s),
            }),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(leaves, field, &join_path(path, &i.to_string()), item);
                }
            },
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = join_path(path, key);
                    self.push_key(leaves, field, &child_path, key);
                    self.walk(leaves, field, &child_path, child);
                }
            },
            Value::Null | Value::Bool(_) | Value::Number(_) => {},
        }
    }

    fn push_key(&self, leaves: &mut Vec<NormalizedLeaf>, field: &str, path: &str, key: &str) {
        leaves.push(NormalizedLeaf {
            field: field.to_string(),
            path: path.to_string(),
            role: LeafRole::Key,
            text: self.normalize_str(key),
        });
    }
}

/// Field name used for findings not attributable to a top-level key
pub const ROOT_FIELD: &str = "<query>";

pub(crate) fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

fn still_decodable(s: &str) -> bool {
    DECODERS
        .iter()
        .any(|(_, decoder)| decoder(s).is_some_and(|d| fold(&d).0 != s))
}

/// NFKC plus invisible-character removal and lookalike folding.
///
/// Returns the folded string and how many invisible characters were removed.
pub fn fold(input: &str) -> (String, usize) {
    let mut removed = 0;
    let folded = input
        .nfkc()
        .filter(|&c| {
            let invisible = is_invisible(c);
            if invisible {
                removed += 1;
            }
            !invisible
        })
        .map(fold_char)
        .collect();
    (folded, removed)
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FE00}'..='\u{FE0F}'
            | '\u{FEFF}'
    )
}

fn fold_char(c: char) -> char {
    match c {
        c if c.is_whitespace() => ' ',
        // Typographic quotes
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{00B4}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
        // Cyrillic lookalikes
        '\u{0410}' => 'A',
        '\u{0430}' => 'a',
        '\u{0412}' => 'B',
        '\u{0421}' => 'C',
        '\u{0441}' => 'c',
        '\u{0415}' => 'E',
        '\u{0435}' => 'e',
        '\u{041D}' => 'H',
        '\u{0406}' => 'I',
        '\u{0456}' => 'i',
        '\u{0408}' => 'J',
        '\u{041A}' => 'K',
        '\u{041C}' => 'M',
        '\u{041E}' => 'O',
        '\u{043E}' => 'o',
        '\u{0420}' => 'P',
        '\u{0440}' => 'p',
        '\u{0405}' => 'S',
        '\u{0455}' => 's',
        '\u{0422}' => 'T',
        '\u{0425}' => 'X',
        '\u{0445}' => 'x',
        '\u{0423}' => 'Y',
        '\u{0443}' => 'y',
        // Greek lookalikes
        '\u{0391}' => 'A',
        '\u{0392}' => 'B',
        '\u{0395}' => 'E',
        '\u{0397}' => 'H',
        '\u{0399}' => 'I',
        '\u{039A}' => 'K',
        '\u{039C}' => 'M',
        '\u{039D}' => 'N',
        '\u{039F}' => 'O',
        '\u{03BF}' => 'o',
        '\u{03A1}' => 'P',
        '\u{03A4}' => 'T',
        '\u{03A7}' => 'X',
        '\u{03A5}' => 'Y',
        '\u{0396}' => 'Z',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fullwidth_collapses() {
        let (folded, _) = fold("ＳＥＬＥＣＴ ＊ ＦＲＯＭ users");
        assert_eq!(folded, "SELECT * FROM users");
    }

    #[test]
    fn test_invisible_and_lookalikes() {
        let (folded, removed) = fold("DR\u{200B}OP \u{0422}\u{0410}BLE");
        assert_eq!(folded, "DROP TABLE");
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_plain_ascii_unchanged() {
        let n = Normalizer::new().normalize_str("ABC-123");
        assert_eq!(n.canonical, "ABC-123");
        assert!(n.layers.is_empty());
        assert!(!n.is_suspicious());
    }

    #[test]
    fn test_url_layer() {
        let n = Normalizer::new().normalize_str("%27%3B%20DROP%20TABLE%3B%20--");
        assert_eq!(n.canonical, "'; DROP TABLE; --");
        assert_eq!(n.layers, vec![Encoding::Url]);
        assert_eq!(n.forms().count(), 2);
    }

    #[test]
    fn test_double_url_encoding() {
        let n = Normalizer::new().normalize_str("%2524where");
        assert_eq!(n.canonical, "$where");
        assert_eq!(n.layers, vec![Encoding::Url, Encoding::Url]);
    }

    #[test]
    fn test_layer_limit_marks_suspicious() {
        let mut encoded = "$where".to_string();
        for _ in 0..8 {
            encoded = encoded.replace('%', "%25").replace('$', "%24");
        }
        let normalizer = Normalizer {
            max_layers: 3,
            max_decoded_bytes: 4096,
        };
        let n = normalizer.normalize_str(&encoded);
        assert_eq!(n.layers.len(), 3);
        assert_eq!(n.suspicion, Some(Suspicion::LayerLimit));
    }

    #[test]
    fn test_expansion_limit() {
        let normalizer = Normalizer {
            max_layers: 5,
            max_decoded_bytes: 8,
        };
        let n = normalizer.normalize_str("%41%41%41%41%41%41%41%41%41%41");
        assert_eq!(n.suspicion, Some(Suspicion::ExpansionLimit));
        // Falls back to the last value that fit
        assert_eq!(n.canonical, "%41%41%41%41%41%41%41%41%41%41");
    }

    #[test]
    fn test_fold_expansion_limit() {
        let normalizer = Normalizer {
            max_layers: 5,
            max_decoded_bytes: 1024,
        };
        // U+FDFA is 3 bytes and folds to an 18-character phrase
        let n = normalizer.normalize_str(&"\u{FDFA}".repeat(100));
        assert_eq!(n.suspicion, Some(Suspicion::ExpansionLimit));
        assert!(n.layers.is_empty());
    }

    #[test]
    fn test_decoded_fold_expansion_limit() {
        let normalizer = Normalizer {
            max_layers: 5,
            max_decoded_bytes: 1024,
        };
        let encoded = "%EF%B7%BA".repeat(100);
        let n = normalizer.normalize_str(&encoded);
        assert_eq!(n.suspicion, Some(Suspicion::ExpansionLimit));
        assert!(n.canonical.len() <= 1024);
        assert_eq!(n.canonical, encoded);
    }

    #[test]
    fn test_discard_decoded() {
        let mut n = Normalizer::new().normalize_str("0X272D2D");
        assert_eq!(n.canonical, "'--");
        n.discard_decoded();
        assert_eq!(n.canonical, "0X272D2D");
        assert_eq!(n.forms().collect::<Vec<_>>(), vec!["0X272D2D"]);
        assert!(!n.is_suspicious());
    }

    #[test]
    fn test_nested_leaves_keep_field() {
        let leaves = Normalizer::new().normalize_value(&json!({
            "face_shape": {"%24ne": null},
            "sku": ["ABC-1", "DEF-2"],
        }));

        let op = leaves
            .iter()
            .find(|l| l.role == LeafRole::Key && l.path == "face_shape.%24ne")
            .unwrap();
        assert_eq!(op.field, "face_shape");
        assert_eq!(op.text.canonical, "$ne");

        let skus: Vec<_> = leaves
            .iter()
            .filter(|l| l.field == "sku" && l.role == LeafRole::Value)
            .map(|l| l.path.as_str())
            .collect();
        assert_eq!(skus, vec!["sku.0", "sku.1"]);
    }
}
