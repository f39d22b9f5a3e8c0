//! Shallow variable schema validation

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::interpolate::lookup;

/// Primitive kinds a declared field can be checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Variable contract of a template.
///
/// `required` names top-level groups (or dotted paths) that must be present.
/// `fields` maps dotted paths to the primitive type they must have when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

impl VariableSchema {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.fields.is_empty()
    }

    /// Check `variables` against the schema, collecting every failure.
    pub fn validate(&self, variables: &Value) -> ValidationReport {
        let mut errors = Vec::new();

        for name in &self.required {
            if lookup(variables, &split_path(name)).is_none() {
                errors.push(FieldError {
                    field: name.clone(),
                    message: "is required".to_string(),
                });
            }
        }

        for (name, expected) in &self.fields {
            let Some(value) = lookup(variables, &split_path(name)) else {
                continue;
            };

            if !expected.matches(value) {
                errors.push(FieldError {
                    field: name.clone(),
                    message: format!("expected {}, got {}", expected, kind_of(value)),
                });
            }
        }

        ValidationReport::from_errors(errors)
    }
}

fn split_path(name: &str) -> Vec<String> {
    name.split('.').map(str::to_string).collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> VariableSchema {
        serde_json::from_value(json!({
            "required": ["user", "order"],
            "fields": {
                "user.name": "string",
                "order.total": "number",
                "order.paid": "boolean",
                "items": "array"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_variables() {
        let report = schema().validate(&json!({
            "user": {"name": "Ana"},
            "order": {"total": 12.5, "paid": true},
            "items": []
        }));
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let report = schema().validate(&json!({
            "user": {"name": 42},
            "items": "nope"
        }));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);

        let fields: Vec<&str> = report.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"order"));
        assert!(fields.contains(&"user.name"));
        assert!(fields.contains(&"items"));

        let name_error = report.errors.iter().find(|e| e.field == "user.name").unwrap();
        assert_eq!(name_error.message, "expected string, got number");
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let report = schema().validate(&json!({"user": {}, "order": {}}));
        assert!(report.valid);
    }

    #[test]
    fn test_null_required_is_missing() {
        let report = schema().validate(&json!({"user": null, "order": {}}));
        assert_eq!(
            report.errors,
            vec![FieldError {
                field: "user".to_string(),
                message: "is required".to_string(),
            }]
        );
    }

    #[test]
    fn test_nested_shapes_not_deeply_checked() {
        let schema: VariableSchema =
            serde_json::from_value(json!({"fields": {"meta": "object"}})).unwrap();
        assert!(schema.validate(&json!({"meta": {"anything": [1, {"x": null}]}})).valid);
    }

    #[test]
    fn test_empty_schema_accepts_anything() {
        let schema = VariableSchema::default();
        assert!(schema.is_empty());
        assert!(schema.validate(&json!({"x": 1})).valid);
    }
}
