//! # Defensive Decoder
//!
//! Models wrap JSON in prose, code fences, or several candidate objects. The
//! decoder scans left to right for brace-balanced top-level objects (string
//! and escape aware) and returns the first one that parses and has the
//! expected shape. When a span fails to parse, the scan retries inside it.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{DecodeError, DecodeErrorReason};

/// JSON type of a value, as named by JSON Schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl JsonKind {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "object" => Self::Object,
            "array" => Self::Array,
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "null" => Self::Null,
            _ => return None,
        })
    }

    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Object, Value::Object(_))
            | (Self::Array, Value::Array(_))
            | (Self::String, Value::String(_))
            | (Self::Number, Value::Number(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Null, Value::Null) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }
}

/// Top-level keys and types a decoded object must have
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpectedShape {
    required: Vec<String>,
    /// `(key, accepted kinds)`; an empty list accepts anything
    types: Vec<(String, Vec<JsonKind>)>,
}

impl ExpectedShape {
    /// Any object is acceptable
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(required: &[&str]) -> Self {
        Self {
            required: required.iter().map(|k| k.to_string()).collect(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, key: &str, kinds: &[JsonKind]) -> Self {
        self.types.push((key.to_string(), kinds.to_vec()));
        self
    }

    /// Derive the shape from a payload's JSON schema
    pub fn of<T: JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        match serde_json::to_value(&schema) {
            Ok(value) => Self::from_schema(&value),
            Err(_) => Self::any(),
        }
    }

    /// Read `required` and property `type`s from a root object schema
    pub fn from_schema(schema: &Value) -> Self {
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let types = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(key, prop)| (key.clone(), property_kinds(schema, prop)))
                    .collect()
            })
            .unwrap_or_default();

        Self { required, types }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Describe the first mismatch, if any
    pub fn check(&self, object: &Map<String, Value>) -> Result<(), String> {
        if let Some(missing) = self.required.iter().find(|k| !object.contains_key(*k)) {
            return Err(format!("missing required key '{}'", missing));
        }
        for (key, kinds) in &self.types {
            let Some(value) = object.get(key) else {
                continue;
            };
            if !kinds.is_empty() && !kinds.iter().any(|k| k.matches(value)) {
                return Err(format!(
                    "key '{}' has the wrong type (expected {:?})",
                    key, kinds
                ));
            }
        }
        Ok(())
    }
}

fn property_kinds(root: &Value, prop: &Value) -> Vec<JsonKind> {
    let resolved = prop
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix("#/$defs/").or_else(|| r.strip_prefix("#/definitions/")))
        .and_then(|name| {
            root.get("$defs")
                .or_else(|| root.get("definitions"))
                .and_then(|defs| defs.get(name))
        })
        .unwrap_or(prop);

    let mut kinds: Vec<JsonKind> = match resolved.get("type") {
        Some(Value::String(name)) => JsonKind::parse(name).into_iter().collect(),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .filter_map(JsonKind::parse)
            .collect(),
        _ => Vec::new(),
    };
    if kinds.contains(&JsonKind::Number) {
        kinds.push(JsonKind::Integer);
    }
    kinds
}

/// Index of the `}` closing the object opened at `start`
pub fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes.get(start..)?.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first acceptable JSON object from raw model text.
///
/// A balanced span that fails to parse is scanned again from just past its
/// opening brace, so an object nested inside brace-y prose is still found. A
/// span that parses is skipped as a whole.
pub fn decode(raw: &str, expected: &ExpectedShape) -> Result<Map<String, Value>, DecodeError> {
    let bytes = raw.as_bytes();
    let mut balanced = false;
    let mut mismatch: Option<String> = None;
    let mut malformed: Option<String> = None;

    let mut start = 0;
    while start < bytes.len() {
        if bytes[start] != b'{' {
            start += 1;
            continue;
        }
        let Some(end) = matching_close(bytes, start) else {
            start += 1;
            continue;
        };
        balanced = true;

        match serde_json::from_str::<Value>(&raw[start..=end]) {
            Ok(Value::Object(object)) => match expected.check(&object) {
                Ok(()) => return Ok(object),
                Err(detail) => {
                    mismatch.get_or_insert(detail);
                }
            },
            Ok(_) => {}
            Err(e) => {
                malformed.get_or_insert(e.to_string());
                start += 1;
                continue;
            }
        }
        start = end + 1;
    }

    if !balanced {
        return Err(DecodeError::new(
            DecodeErrorReason::NoJsonFound,
            "no brace-balanced JSON object in response",
            raw,
        ));
    }
    Err(match (mismatch, malformed) {
        (Some(detail), _) => DecodeError::new(DecodeErrorReason::SchemaMismatch, detail, raw),
        (None, Some(detail)) => DecodeError::new(DecodeErrorReason::MalformedJson, detail, raw),
        (None, None) => DecodeError::new(
            DecodeErrorReason::NoJsonFound,
            "no JSON object in response",
            raw,
        ),
    })
}

/// Decode and deserialize into a typed payload
pub fn decode_as<T: DeserializeOwned + JsonSchema>(raw: &str) -> Result<T, DecodeError> {
    let object = decode(raw, &ExpectedShape::of::<T>())?;
    serde_json::from_value(Value::Object(object))
        .map_err(|e| DecodeError::new(DecodeErrorReason::SchemaMismatch, e.to_string(), raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Pitch {
        topic: String,
        score: f64,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[test]
    fn test_extracts_object_from_prose() {
        let raw = "Here is the result: {\"a\": 1} hope that helps";
        let object = decode(raw, &ExpectedShape::any()).unwrap();
        assert_eq!(object.get("a"), Some(&Value::from(1)));
    }

    #[test]
    fn test_no_json_found() {
        let err = decode("I could not think of anything.", &ExpectedShape::any()).unwrap_err();
        assert_eq!(err.reason, DecodeErrorReason::NoJsonFound);
        assert!(err.raw_excerpt.contains("could not think"));
    }

    #[test]
    fn test_code_fence_and_braces_in_strings() {
        let raw = "```json\n{\"topic\": \"use {braces} and \\\"quotes\\\"\", \"score\": 0.5}\n```";
        let pitch: Pitch = decode_as(raw).unwrap();
        assert_eq!(pitch.topic, "use {braces} and \"quotes\"");
    }

    #[test]
    fn test_first_matching_object_wins() {
        let raw = concat!(
            "Example: {\"note\": \"draft\"} ",
            "Final: {\"topic\": \"edge\", \"score\": 1} ",
            "{\"topic\": \"late\", \"score\": 0}"
        );
        let pitch: Pitch = decode_as(raw).unwrap();
        assert_eq!(pitch.topic, "edge");
    }

    #[test]
    fn test_nested_object_is_returned_whole() {
        let object = decode("x {\"a\": {\"b\": 1}} y {}", &ExpectedShape::any()).unwrap();
        assert_eq!(object.get("a"), Some(&serde_json::json!({ "b": 1 })));
    }

    #[test]
    fn test_object_inside_malformed_span_is_found() {
        let object = decode("Consider {x: {\"a\":1}} ok", &ExpectedShape::any()).unwrap();
        assert_eq!(object.get("a"), Some(&Value::from(1)));

        let raw = "notes {draft: {\"topic\": \"edge\", \"score\": 0.5}, more} done";
        let pitch: Pitch = decode_as(raw).unwrap();
        assert_eq!(pitch.topic, "edge");
    }

    #[test]
    fn test_unbalanced_prose_brace_is_skipped() {
        let raw = "set {x then {\"topic\": \"t\", \"score\": 2}";
        let pitch: Pitch = decode_as(raw).unwrap();
        assert_eq!(pitch.score, 2.0);
    }

    #[test]
    fn test_malformed_json() {
        let err = decode("{\"topic\": 'single quotes'}", &ExpectedShape::any()).unwrap_err();
        assert_eq!(err.reason, DecodeErrorReason::MalformedJson);
    }

    #[test]
    fn test_schema_mismatch() {
        let missing = decode_as::<Pitch>("{\"topic\": \"t\"}").unwrap_err();
        assert_eq!(missing.reason, DecodeErrorReason::SchemaMismatch);
        assert!(missing.detail.contains("score"));

        let wrong_type = decode_as::<Pitch>("{\"topic\": 3, \"score\": 1}").unwrap_err();
        assert_eq!(wrong_type.reason, DecodeErrorReason::SchemaMismatch);
        assert!(wrong_type.detail.contains("topic"));
    }

    #[test]
    fn test_shape_from_schema() {
        let shape = ExpectedShape::of::<Pitch>();
        assert!(shape.required().contains(&"topic".to_string()));
        assert!(shape.required().contains(&"score".to_string()));
        assert!(!shape.required().contains(&"tags".to_string()));
    }

    fn json_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z{} ]{0,12}".prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn test_valid_object_survives_surrounding_prose(
            fields in prop::collection::btree_map("[a-z]{1,8}", json_value(), 1..5),
            before in "[A-Za-z0-9 .,:!?\n-]{0,30}\\{?[a-z ]{0,10}",
            after in "[a-z .]{0,10}\\}?[A-Za-z0-9 .,!?\n]{0,30}",
        ) {
            let object: Map<String, Value> = fields.into_iter().collect();
            let raw = format!("{}{}{}", before, Value::Object(object.clone()), after);
            let decoded = decode(&raw, &ExpectedShape::any());
            prop_assert_eq!(decoded, Ok(object));
        }
    }
}
