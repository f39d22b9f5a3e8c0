//! Variable interpolation over a template structure

use serde::Serialize;
use serde_json::{Map, Value};

use super::expression::{self, ExpressionError, Segment};
use super::types::{TemplateError, TemplateResult};

/// An expression that resolved to nothing and had no fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderWarning {
    /// JSON pointer of the string leaf (`/hero/title`, `/actions/0/label`)
    pub location: String,
    pub path: String,
}

/// Output of [`render`]
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub value: Value,
    pub warnings: Vec<RenderWarning>,
}

/// Interpolate every string leaf in `structure` against `variables`.
///
/// Unresolved expressions never fail the render: they take their fallback
/// or become empty with a warning. Only malformed syntax is an error.
pub fn render(structure: &Value, variables: &Value) -> TemplateResult<Rendered> {
    let mut warnings = Vec::new();
    let mut pointer = String::new();
    let value = render_value(structure, variables, &mut pointer, &mut warnings)?;
    Ok(Rendered { value, warnings })
}

/// Interpolate a single string, e.g. a subject line.
pub fn render_str(
    input: &str,
    variables: &Value,
    location: &str,
) -> TemplateResult<(String, Vec<RenderWarning>)> {
    let mut warnings = Vec::new();
    let text = render_leaf(input, variables, location, &mut warnings)?;
    Ok((text, warnings))
}

/// Parse every expression in a structure without rendering it.
pub fn check_structure(structure: &Value) -> TemplateResult<()> {
    let mut pointer = String::new();
    check_value(structure, &mut pointer)
}

/// Parse every expression in a single string.
pub fn check_str(input: &str, location: &str) -> TemplateResult<()> {
    expression::parse(input)
        .map(|_| ())
        .map_err(|source| expression_error(location, source))
}

/// Walk `variables` along `path`. Numeric segments index arrays; `null` counts as absent.
pub fn lookup<'a>(variables: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = variables;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    (!current.is_null()).then_some(current)
}

fn render_value(
    value: &Value,
    variables: &Value,
    pointer: &mut String,
    warnings: &mut Vec<RenderWarning>,
) -> TemplateResult<Value> {
    match value {
        Value::String(s) => Ok(Value::String(render_leaf(s, variables, pointer, warnings)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let len = pointer.len();
                push_token(pointer, &idx.to_string());
                out.push(render_value(item, variables, pointer, warnings)?);
                pointer.truncate(len);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let len = pointer.len();
                push_token(pointer, key);
                out.insert(key.clone(), render_value(item, variables, pointer, warnings)?);
                pointer.truncate(len);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn render_leaf(
    input: &str,
    variables: &Value,
    location: &str,
    warnings: &mut Vec<RenderWarning>,
) -> TemplateResult<String> {
    if !expression::has_expressions(input) {
        return Ok(input.to_string());
    }

    let segments =
        expression::parse(input).map_err(|source| expression_error(location, source))?;

    let mut out = String::with_capacity(input.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Expr(expr) => match lookup(variables, &expr.path) {
                Some(value) => out.push_str(&substitution(value)),
                None => match expr.fallback {
                    Some(fallback) => out.push_str(&fallback),
                    None => warnings.push(RenderWarning {
                        location: display_location(location),
                        path: expr.dotted_path(),
                    }),
                },
            },
        }
    }

    Ok(out)
}

fn check_value(value: &Value, pointer: &mut String) -> TemplateResult<()> {
    match value {
        Value::String(s) => check_str(s, pointer),
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                let len = pointer.len();
                push_token(pointer, &idx.to_string());
                check_value(item, pointer)?;
                pointer.truncate(len);
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map {
                let len = pointer.len();
                push_token(pointer, key);
                check_value(item, pointer)?;
                pointer.truncate(len);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn substitution(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Append an RFC 6901 reference token
fn push_token(pointer: &mut String, token: &str) {
    pointer.push('/');
    for ch in token.chars() {
        match ch {
            '~' => pointer.push_str("~0"),
            '/' => pointer.push_str("~1"),
            _ => pointer.push(ch),
        }
    }
}

fn display_location(location: &str) -> String {
    if location.is_empty() {
        "/".to_string()
    } else {
        location.to_string()
    }
}

fn expression_error(location: &str, source: ExpressionError) -> TemplateError {
    TemplateError::Expression {
        location: display_location(location),
        source,
    }
}
