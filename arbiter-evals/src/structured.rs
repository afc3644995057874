// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Structured judge responses
//!
//! Every evaluator declares the JSON shape it expects back from the judge
//! model as a [`ResponseSchema`]. Raw model text is turned into a typed
//! response by [`parse_structured`]: the JSON object is located in the text,
//! checked against the schema (presence, types, ranges, enum membership),
//! deserialised, and finally passed through the response's own
//! [`StructuredResponse::validate`] hook.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// JSON type of a schema field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Number,
    String,
    Boolean,
    StringList,
    /// String restricted to a closed set of values
    Enum(Vec<String>),
    Object,
    ObjectList,
}

impl FieldKind {
    fn describe(&self) -> String {
        match self {
            FieldKind::Number => "number".to_string(),
            FieldKind::String => "string".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::StringList => "array of strings".to_string(),
            FieldKind::Enum(values) => format!("one of {}", values.join(" | ")),
            FieldKind::Object => "object".to_string(),
            FieldKind::ObjectList => "array of objects".to_string(),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Number => value.is_number(),
            FieldKind::String => value.is_string(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldKind::Enum(values) => value
                .as_str()
                .is_some_and(|s| values.iter().any(|allowed| allowed == s)),
            FieldKind::Object => value.is_object(),
            FieldKind::ObjectList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_object)),
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            FieldKind::Number => json!({ "type": "number" }),
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::StringList => json!({ "type": "array", "items": { "type": "string" } }),
            FieldKind::Enum(values) => json!({ "type": "string", "enum": values }),
            FieldKind::Object => json!({ "type": "object" }),
            FieldKind::ObjectList => json!({ "type": "array", "items": { "type": "object" } }),
        }
    }
}

/// One field of a response schema
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
    /// Inclusive numeric bounds
    pub range: Option<(f64, f64)>,
}

impl FieldSpec {
    fn new(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
            range: None,
        }
    }

    pub fn number(name: &str, description: &str) -> Self {
        Self::new(name, FieldKind::Number, description)
    }

    /// Number bounded to `[0, 1]`
    pub fn unit(name: &str, description: &str) -> Self {
        Self::number(name, description).range(0.0, 1.0)
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, FieldKind::String, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, FieldKind::Boolean, description)
    }

    pub fn string_list(name: &str, description: &str) -> Self {
        Self::new(name, FieldKind::StringList, description)
    }

    pub fn enumeration(name: &str, values: &[&str], description: &str) -> Self {
        Self::new(
            name,
            FieldKind::Enum(values.iter().map(|v| v.to_string()).collect()),
            description,
        )
    }

    pub fn object(name: &str, description: &str) -> Self {
        Self::new(name, FieldKind::Object, description)
    }

    pub fn object_list(name: &str, description: &str) -> Self {
        Self::new(name, FieldKind::ObjectList, description)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn check(&self, value: Option<&Value>, problems: &mut Vec<String>) {
        let value = match value {
            Some(Value::Null) | None => {
                if self.required {
                    problems.push(format!("missing required field '{}'", self.name));
                }
                return;
            }
            Some(value) => value,
        };

        if !self.kind.matches(value) {
            problems.push(format!(
                "field '{}' must be {}, got {}",
                self.name,
                self.kind.describe(),
                value
            ));
            return;
        }

        if let (Some((min, max)), Some(number)) = (self.range, value.as_f64()) {
            if !(min..=max).contains(&number) {
                problems.push(format!(
                    "field '{}' must be within [{}, {}], got {}",
                    self.name, min, max, number
                ));
            }
        }
    }
}

/// Expected shape of a judge response
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ResponseSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// JSON Schema rendering for clients with native structured output
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut property = field.kind.json_schema();
            if let Some(obj) = property.as_object_mut() {
                obj.insert("description".to_string(), json!(field.description));
                if let Some((min, max)) = field.range {
                    obj.insert("minimum".to_string(), json!(min));
                    obj.insert("maximum".to_string(), json!(max));
                }
            }
            properties.insert(field.name.clone(), property);
        }

        json!({
            "title": self.name,
            "description": self.description,
            "type": "object",
            "properties": properties,
            "required": self.required_fields(),
        })
    }

    /// Prompt text telling the judge how to format its answer
    pub fn instructions(&self) -> String {
        let mut text = String::from(
            "Respond ONLY with a single JSON object (no prose, no code fences) with these fields:\n",
        );
        for field in &self.fields {
            let mut kind = field.kind.describe();
            if let Some((min, max)) = field.range {
                kind = format!("{} in [{}, {}]", kind, min, max);
            }
            text.push_str(&format!(
                "- \"{}\" ({}, {}): {}\n",
                field.name,
                kind,
                if field.required { "required" } else { "optional" },
                field.description
            ));
        }
        text
    }

    /// Check a decoded JSON value against the schema
    pub fn check(&self, value: &Value) -> Result<(), Vec<String>> {
        let object = match value.as_object() {
            Some(object) => object,
            None => return Err(vec![format!("expected a JSON object, got {}", value)]),
        };

        let mut problems = Vec::new();
        for field in &self.fields {
            field.check(object.get(&field.name), &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// A judge response that failed to match its schema
#[derive(Debug, Clone, Error, PartialEq)]
#[error("response does not match schema '{schema}': {}", .problems.join("; "))]
pub struct SchemaError {
    pub schema: String,
    pub problems: Vec<String>,
}

impl SchemaError {
    fn new(schema: &str, problems: Vec<String>) -> Self {
        Self {
            schema: schema.to_string(),
            problems,
        }
    }
}

/// Typed response produced by a judge model
pub trait StructuredResponse: DeserializeOwned + Serialize + Send + 'static {
    /// Schema the judge is asked to follow
    fn schema() -> ResponseSchema;

    /// Headline numeric judgment
    fn judgment(&self) -> f64;

    fn explanation(&self) -> &str;

    /// Checks serde cannot express (nested ranges, cross-field rules)
    fn validate(&self) -> Result<(), Vec<String>> {
        Ok(())
    }
}

fn fenced_block() -> &'static regex::Regex {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```")
            .expect("Invalid fence pattern")
    })
}

/// Locate the JSON object inside raw model text
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(inner) = fenced_block().captures(trimmed).and_then(|c| c.get(1)) {
        return Some(inner.as_str());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// Parse and validate raw judge output into a typed response
pub fn parse_structured<T: StructuredResponse>(raw: &str) -> Result<T, SchemaError> {
    let schema = T::schema();

    let json_text = extract_json(raw).ok_or_else(|| {
        SchemaError::new(
            &schema.name,
            vec!["no JSON object found in response".to_string()],
        )
    })?;

    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| SchemaError::new(&schema.name, vec![format!("invalid JSON: {}", e)]))?;

    schema
        .check(&value)
        .map_err(|problems| SchemaError::new(&schema.name, problems))?;

    let response: T = serde_json::from_value(value)
        .map_err(|e| SchemaError::new(&schema.name, vec![e.to_string()]))?;

    response
        .validate()
        .map_err(|problems| SchemaError::new(&schema.name, problems))?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Verdict {
        score: f64,
        label: String,
        #[serde(default)]
        notes: Vec<String>,
    }

    impl StructuredResponse for Verdict {
        fn schema() -> ResponseSchema {
            ResponseSchema::new("verdict", "test verdict")
                .field(FieldSpec::unit("score", "score"))
                .field(FieldSpec::enumeration("label", &["good", "bad"], "label"))
                .field(FieldSpec::string_list("notes", "notes").optional())
        }

        fn judgment(&self) -> f64 {
            self.score
        }

        fn explanation(&self) -> &str {
            &self.label
        }

        fn validate(&self) -> Result<(), Vec<String>> {
            if self.notes.len() > 2 {
                return Err(vec!["too many notes".to_string()]);
            }
            Ok(())
        }
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 1}\n```\nThanks"),
            Some("{\"a\": 1}")
        );
        assert_eq!(
            extract_json("Result: {\"a\": {\"b\": 2}} done"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_valid_response() {
        let verdict: Verdict =
            parse_structured("```json\n{\"score\": 0.7, \"label\": \"good\"}\n```").unwrap();
        assert_eq!(verdict.score, 0.7);
        assert!(verdict.notes.is_empty());
    }

    #[test]
    fn test_parse_reports_every_problem() {
        let err = parse_structured::<Verdict>(r#"{"score": 1.7, "label": "meh"}"#).unwrap_err();
        assert_eq!(err.schema, "verdict");
        assert_eq!(err.problems.len(), 2);
        assert!(err.problems[0].contains("within [0, 1]"));
        assert!(err.problems[1].contains("one of good | bad"));

        let err = parse_structured::<Verdict>(r#"{"label": "good"}"#).unwrap_err();
        assert_eq!(err.problems, vec!["missing required field 'score'".to_string()]);
    }

    #[test]
    fn test_parse_runs_custom_validation() {
        let err = parse_structured::<Verdict>(
            r#"{"score": 0.2, "label": "bad", "notes": ["a", "b", "c"]}"#,
        )
        .unwrap_err();
        assert_eq!(err.problems, vec!["too many notes".to_string()]);
        assert!(err.to_string().contains("too many notes"));
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = Verdict::schema().to_json_schema();
        assert_eq!(schema["required"], json!(["score", "label"]));
        assert_eq!(schema["properties"]["score"]["maximum"], json!(1.0));
        assert_eq!(schema["properties"]["label"]["enum"], json!(["good", "bad"]));

        let instructions = Verdict::schema().instructions();
        assert!(instructions.contains("\"notes\" (array of strings, optional)"));
    }
}
