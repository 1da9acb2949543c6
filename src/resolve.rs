//! Reference normalization and the inlining policy
//!
//! References are URIs, optionally carrying a JSON-Pointer fragment. This
//! module owns the string-level half of resolution: id normalization,
//! relative-reference joining against a base URI, fragment unescaping, and
//! the policy deciding whether a resolved schema is embedded at the call
//! site or invoked as a separately compiled validator.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use url::Url;

/// Keywords whose children are schema maps keyed by arbitrary names.
///
/// Descending into them does not change reference scope unless the child
/// itself re-declares an `$id`.
const SCHEMA_MAP_KEYWORDS: [&str; 5] = [
    "properties",
    "patternProperties",
    "enum",
    "dependencies",
    "definitions",
];

/// Whether a pointer segment preserves the current base URI
pub(crate) fn preserves_scope(segment: &str) -> bool {
    SCHEMA_MAP_KEYWORDS.contains(&segment)
}

/// Normalize a schema id: trim whitespace and a trailing empty fragment
pub fn normalize_id(id: &str) -> String {
    let id = id.trim();
    id.strip_suffix("#/")
        .or_else(|| id.strip_suffix('#'))
        .unwrap_or(id)
        .to_string()
}

/// The fragment-less part of an id, with a trailing `#` marker
///
/// Two references point into the same document exactly when their full
/// paths compare equal.
pub fn get_full_path(id: &str) -> String {
    let id = normalize_id(id);
    let path = id.split('#').next().unwrap_or("");
    format!("{}#", path)
}

/// Resolve a possibly-relative reference against a base URI
pub fn resolve_url(base_id: &str, reference: &str) -> String {
    if base_id.is_empty() {
        return normalize_id(reference);
    }
    match Url::parse(base_id) {
        Ok(base) => match base.join(reference) {
            Ok(joined) => normalize_id(joined.as_str()),
            Err(_) => normalize_id(reference),
        },
        // A schemeless base only composes with fragment-only references.
        Err(_) => match reference.strip_prefix('#') {
            Some(fragment) => {
                let path = base_id.split('#').next().unwrap_or("");
                normalize_id(&format!("{}#{}", path, fragment))
            }
            None => normalize_id(reference),
        },
    }
}

/// A reference split into its document path and pointer fragment
#[derive(Debug, Clone)]
pub struct ParsedRef {
    pub path: String,
    pub fragment: Option<String>,
}

impl ParsedRef {
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('#') {
            Some((path, fragment)) => Self {
                path: path.to_string(),
                fragment: Some(fragment.to_string()),
            },
            None => Self {
                path: reference.to_string(),
                fragment: None,
            },
        }
    }

    /// Full path of the referenced document (see [`get_full_path`])
    pub fn full_path(&self) -> String {
        get_full_path(&self.path)
    }
}

/// Reverse JSON-Pointer escaping on one fragment segment
///
/// Percent-decoding first, then `~1` before `~0` — reversing that order
/// would corrupt members whose names contain `~1` literally.
pub fn unescape_fragment(segment: &str) -> String {
    percent_encoding::percent_decode_str(segment)
        .decode_utf8_lossy()
        .replace("~1", "/")
        .replace("~0", "~")
}

/// Inlining policy for resolved references
///
/// `Always` still refuses schemas that contain a `$ref` of their own:
/// embedding those would tear the reference out of its resolution scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineRefs {
    Always,
    Never,
    Limit(usize),
}

impl Default for InlineRefs {
    fn default() -> Self {
        InlineRefs::Limit(8)
    }
}

impl Serialize for InlineRefs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            InlineRefs::Always => serializer.serialize_str("always"),
            InlineRefs::Never => serializer.serialize_str("never"),
            InlineRefs::Limit(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for InlineRefs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Word(String),
            Limit(usize),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Limit(n) => Ok(InlineRefs::Limit(n)),
            Repr::Word(w) => match w.as_str() {
                "always" => Ok(InlineRefs::Always),
                "never" => Ok(InlineRefs::Never),
                other => Err(D::Error::custom(format!(
                    "inline_refs must be \"always\", \"never\" or a number, got {:?}",
                    other
                ))),
            },
        }
    }
}

/// Decide whether a resolved schema may be embedded at the reference site
pub fn inline_ref(schema: &Value, policy: InlineRefs) -> bool {
    if schema.is_boolean() {
        return true;
    }
    match policy {
        InlineRefs::Never => false,
        InlineRefs::Always => !has_ref(schema),
        InlineRefs::Limit(limit) => count_keys(schema).map(|n| n <= limit).unwrap_or(false),
    }
}

fn has_ref(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key("$ref") || map.values().any(has_ref)
        }
        Value::Array(items) => items.iter().any(has_ref),
        _ => false,
    }
}

/// Recursive member count; `None` when the schema contains a `$ref`
fn count_keys(value: &Value) -> Option<usize> {
    match value {
        Value::Object(map) => {
            if map.contains_key("$ref") {
                return None;
            }
            let mut count = map.len();
            for child in map.values() {
                count += count_keys(child)?;
            }
            Some(count)
        }
        Value::Array(items) => {
            let mut count = 0;
            for item in items {
                count += count_keys(item)?;
            }
            Some(count)
        }
        _ => Some(0),
    }
}
