//! Data-level schema descriptors and the validator that turns raw model output
//! (or tool arguments) into a checked JSON value.
//!
//! A [`Schema`] is a named list of [`Field`]s. It is interpreted at run time, so
//! an agent's expected result shape can be assembled while the agent is built:
//!
//! ```
//! use relay_engine::{FieldType, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::new("FinalResult").field("number", FieldType::Integer);
//! assert!(schema.validate(&json!({"number": 4})).is_ok());
//! assert!(schema.validate(&json!({"number": "4"})).is_err());
//! ```

use std::fmt;

use serde_json::{json, Map, Number, Value};
use thiserror::Error;

/// How far the validator may stray from an exact type match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionPolicy {
    /// Only exact matches are accepted.
    #[default]
    Strict,
    /// Numeric strings may become integers or numbers, `"true"`/`"false"` may become booleans.
    Lenient,
}

/// What to do with object keys the schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFields {
    /// Drop them from the validated value.
    #[default]
    Ignore,
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<FieldType>),
    Object(Schema),
    Any,
}

impl FieldType {
    pub fn array_of(items: FieldType) -> Self {
        Self::Array(Box::new(items))
    }

    fn to_json_schema(&self) -> Value {
        match self {
            FieldType::String => json!({"type": "string"}),
            FieldType::Integer => json!({"type": "integer"}),
            FieldType::Number => json!({"type": "number"}),
            FieldType::Boolean => json!({"type": "boolean"}),
            FieldType::Array(items) => json!({"type": "array", "items": items.to_json_schema()}),
            FieldType::Object(schema) => schema.to_json_schema(),
            FieldType::Any => json!({}),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array(_) => "array",
            FieldType::Object(_) => "object",
            FieldType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

impl Field {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Shape of a structured value: field name → type + required flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    policy: CoercionPolicy,
    unknown_fields: UnknownFields,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            policy: CoercionPolicy::default(),
            unknown_fields: UnknownFields::default(),
        }
    }

    /// Add a required field.
    pub fn field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(Field::required(name, ty))
    }

    /// Add an optional field. Absent and `null` values are both accepted.
    pub fn optional(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(Field::optional(name, ty))
    }

    /// Add a field, replacing any earlier field of the same name.
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.retain(|existing| existing.name != field.name);
        self.fields.push(field);
        self
    }

    pub fn with_policy(mut self, policy: CoercionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_unknown_fields(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    /// Validate `raw` and return the checked value: declared fields only, with
    /// coercions applied when the policy allows them.
    pub fn validate(&self, raw: &Value) -> Result<Value, ValidationError> {
        let mut issues = Vec::new();
        let checked = self.check_object(raw, "", self.policy, &mut issues);
        match checked {
            Some(value) if issues.is_empty() => Ok(value),
            _ => Err(ValidationError {
                schema: self.name.clone(),
                issues,
            }),
        }
    }

    /// Parse `raw` as JSON, then [`validate`](Self::validate) it.
    pub fn validate_text(&self, raw: &str) -> Result<Value, ValidationError> {
        let parsed: Value = serde_json::from_str(raw.trim()).map_err(|err| ValidationError {
            schema: self.name.clone(),
            issues: vec![ValidationIssue::new("", format!("invalid JSON: {err}"))],
        })?;
        self.validate(&parsed)
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut rendered = field.ty.to_json_schema();
            if let (Some(description), Value::Object(map)) = (&field.description, &mut rendered) {
                map.insert("description".into(), Value::String(description.clone()));
            }
            properties.insert(field.name.clone(), rendered);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.unknown_fields == UnknownFields::Ignore,
        })
    }

    fn check_object(
        &self,
        raw: &Value,
        path: &str,
        policy: CoercionPolicy,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<Value> {
        let Value::Object(object) = raw else {
            issues.push(ValidationIssue::mismatch(path, "object", raw));
            return None;
        };

        let before = issues.len();
        let mut checked = Map::new();
        for field in &self.fields {
            let field_path = format!("{path}/{}", field.name);
            match object.get(&field.name) {
                None if field.required => {
                    issues.push(ValidationIssue::new(field_path, "missing required field"));
                }
                Some(Value::Null) if field.required => {
                    issues.push(ValidationIssue::new(field_path, "required field is null"));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if let Some(value) = check_value(&field.ty, value, &field_path, policy, issues)
                    {
                        checked.insert(field.name.clone(), value);
                    }
                }
            }
        }

        if self.unknown_fields == UnknownFields::Reject {
            for key in object.keys() {
                if !self.fields.iter().any(|field| &field.name == key) {
                    issues.push(ValidationIssue::new(format!("{path}/{key}"), "unknown field"));
                }
            }
        }

        (issues.len() == before).then_some(Value::Object(checked))
    }
}

fn check_value(
    ty: &FieldType,
    value: &Value,
    path: &str,
    policy: CoercionPolicy,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Value> {
    let lenient = policy == CoercionPolicy::Lenient;
    let coerced = match (ty, value) {
        (FieldType::Any, value) => Some(value.clone()),
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (FieldType::Integer, Value::String(text)) if lenient => {
            text.parse::<i64>().ok().map(Value::from)
        }
        (FieldType::Number, Value::Number(_)) => Some(value.clone()),
        (FieldType::Number, Value::String(text)) if lenient => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::String(text)) if lenient => match text.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::Array(items), Value::Array(elements)) => {
            let before = issues.len();
            let checked: Vec<Value> = elements
                .iter()
                .enumerate()
                .filter_map(|(index, element)| {
                    check_value(items, element, &format!("{path}/{index}"), policy, issues)
                })
                .collect();
            return (issues.len() == before).then_some(Value::Array(checked));
        }
        (FieldType::Object(schema), _) => return schema.check_object(value, path, policy, issues),
        _ => None,
    };

    if coerced.is_none() {
        issues.push(ValidationIssue::mismatch(path, ty.label(), value));
    }
    coerced
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Slash-separated location of the offending value; empty for the root.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    fn mismatch(path: &str, expected: &str, found: &Value) -> Self {
        Self::new(
            path,
            format!("expected {expected}, found {}", json_type(found)),
        )
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{path}: {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{schema}` rejected value: {}", render_issues(.issues))]
pub struct ValidationError {
    pub schema: String,
    pub issues: Vec<ValidationIssue>,
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_result() -> Schema {
        Schema::new("FinalResult").field("number", FieldType::Integer)
    }

    #[test]
    fn accepts_exact_match() {
        let value = final_result().validate(&json!({"number": 7})).unwrap();
        assert_eq!(value, json!({"number": 7}));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = final_result().validate(&json!({})).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].path, "/number");
        assert_eq!(err.issues[0].message, "missing required field");
    }

    #[test]
    fn strict_policy_does_not_coerce() {
        let err = final_result().validate(&json!({"number": "7"})).unwrap_err();
        assert_eq!(err.issues[0].message, "expected integer, found string");

        let err = final_result().validate(&json!({"number": 7.0})).unwrap_err();
        assert_eq!(err.issues[0].message, "expected integer, found number");
    }

    #[test]
    fn lenient_policy_coerces_numeric_strings() {
        let schema = final_result()
            .optional("flag", FieldType::Boolean)
            .with_policy(CoercionPolicy::Lenient);

        let value = schema
            .validate(&json!({"number": "12", "flag": "true"}))
            .unwrap();
        assert_eq!(value, json!({"number": 12, "flag": true}));

        assert!(schema.validate(&json!({"number": "twelve"})).is_err());
    }

    #[test]
    fn unknown_fields_are_dropped_or_rejected() {
        let raw = json!({"number": 1, "extra": "x"});
        assert_eq!(final_result().validate(&raw).unwrap(), json!({"number": 1}));

        let err = final_result()
            .with_unknown_fields(UnknownFields::Reject)
            .validate(&raw)
            .unwrap_err();
        assert_eq!(err.issues[0].path, "/extra");
    }

    #[test]
    fn optional_fields_accept_null_and_absence() {
        let schema = final_result().optional("note", FieldType::String);
        assert_eq!(
            schema.validate(&json!({"number": 1, "note": null})).unwrap(),
            json!({"number": 1})
        );
        assert!(schema.validate(&json!({"number": 1})).is_ok());
        assert!(schema.validate(&json!({"number": 1, "note": 5})).is_err());
    }

    #[test]
    fn reports_nested_paths_for_every_issue() {
        let point = Schema::new("Point")
            .field("x", FieldType::Number)
            .field("y", FieldType::Number);
        let schema = Schema::new("Path")
            .field("points", FieldType::array_of(FieldType::Object(point)))
            .field("label", FieldType::String);

        let err = schema
            .validate(&json!({"points": [{"x": 1, "y": 2}, {"x": "a"}], "label": 3}))
            .unwrap_err();
        let paths: Vec<&str> = err.issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["/points/1/x", "/points/1/y", "/label"]);
    }

    #[test]
    fn validate_text_parses_json_first() {
        let schema = final_result();
        assert_eq!(
            schema.validate_text(" {\"number\": 3} ").unwrap(),
            json!({"number": 3})
        );
        let err = schema.validate_text("three").unwrap_err();
        assert!(err.issues[0].message.starts_with("invalid JSON"));
    }

    #[test]
    fn rejects_non_object_root() {
        let err = final_result().validate(&json!(4)).unwrap_err();
        assert_eq!(err.to_string(), "`FinalResult` rejected value: /: expected object, found integer");
    }

    #[test]
    fn renders_json_schema() {
        let schema = final_result()
            .with_field(Field::optional("reason", FieldType::String).describe("why"));
        let rendered = schema.to_json_schema();
        assert_eq!(rendered["title"], "FinalResult");
        assert_eq!(rendered["properties"]["number"]["type"], "integer");
        assert_eq!(rendered["properties"]["reason"]["description"], "why");
        assert_eq!(rendered["required"], json!(["number"]));
    }
}
