//! Tokenizer for `{{path}}` / `{{path|fallback}}` interpolation expressions.
//!
//! A string leaf is split into literal text and expressions:
//!
//! - `{{ user.name }}` resolves `user` then `name` in the caller variables
//! - `{{ user.name | there }}` substitutes `there` when the path is unresolved
//! - the first `|` ends the path, later pipes belong to the fallback
//! - `\{{` in literal text yields a literal `{{`
//! - inside an expression `\}`, `\|` and `\\` yield `}`, `|` and `\`

use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

/// Syntax errors, reported with the byte offset of the opening `{{`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("unterminated expression starting at byte {offset}")]
    Unterminated { offset: usize },

    #[error("empty variable path at byte {offset}")]
    EmptyPath { offset: usize },

    #[error("invalid path segment '{segment}' at byte {offset}")]
    InvalidSegment { segment: String, offset: usize },
}

/// One parsed `{{ ... }}` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    /// Dot-separated path segments
    pub path: Vec<String>,
    /// Fallback literal, substituted verbatim when the path is unresolved
    pub fallback: Option<String>,
    /// Source text including the braces
    pub raw: String,
}

impl Expression {
    /// The path joined back with dots
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Expr(Expression),
}

/// Split a string leaf into literal and expression segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, ExpressionError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = input.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' if input[idx + 1..].starts_with("{{") => {
                literal.push_str("{{");
                chars.next();
                chars.next();
            }
            '{' if input[idx + 1..].starts_with('{') => {
                chars.next();
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Expr(parse_expression(input, idx, &mut chars)?));
            }
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

/// Whether the string contains anything that needs interpolation.
pub fn has_expressions(input: &str) -> bool {
    input.contains("{{")
}

fn parse_expression(
    input: &str,
    start: usize,
    chars: &mut Peekable<CharIndices<'_>>,
) -> Result<Expression, ExpressionError> {
    let mut path = String::new();
    let mut fallback: Option<String> = None;

    let end = loop {
        let Some((idx, ch)) = chars.next() else {
            return Err(ExpressionError::Unterminated { offset: start });
        };

        // The first unescaped pipe opens the fallback
        if ch == '|' && fallback.is_none() {
            fallback = Some(String::new());
            continue;
        }

        let target = match fallback.as_mut() {
            Some(fallback) => fallback,
            None => &mut path,
        };

        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => target.push(escaped),
                None => return Err(ExpressionError::Unterminated { offset: start }),
            },
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                break idx + 2;
            }
            _ => target.push(ch),
        }
    };

    Ok(Expression {
        path: parse_path(path.trim(), start)?,
        fallback: fallback.map(|f| f.trim().to_string()),
        raw: input[start..end].to_string(),
    })
}

fn parse_path(path: &str, offset: usize) -> Result<Vec<String>, ExpressionError> {
    if path.is_empty() {
        return Err(ExpressionError::EmptyPath { offset });
    }

    path.split('.')
        .map(|segment| {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if valid {
                Ok(segment.to_string())
            } else {
                Err(ExpressionError::InvalidSegment {
                    segment: segment.to_string(),
                    offset,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(path: &[&str], fallback: Option<&str>, raw: &str) -> Segment {
        Segment::Expr(Expression {
            path: path.iter().map(|s| s.to_string()).collect(),
            fallback: fallback.map(str::to_string),
            raw: raw.to_string(),
        })
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            parse("Hello world").unwrap(),
            vec![Segment::Literal("Hello world".to_string())]
        );
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_path_and_fallback() {
        let segments = parse("Hi {{ user.name | there }}!").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("Hi ".to_string()),
                expr(&["user", "name"], Some("there"), "{{ user.name | there }}"),
                Segment::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_multiple_expressions() {
        let segments = parse("{{a}}-{{b|x}}").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], expr(&["a"], None, "{{a}}"));
        assert_eq!(segments[2], expr(&["b"], Some("x"), "{{b|x}}"));
    }

    #[test]
    fn test_pipes_inside_fallback_are_literal() {
        let segments = parse("{{x|a|b|c}}").unwrap();
        assert_eq!(segments, vec![expr(&["x"], Some("a|b|c"), "{{x|a|b|c}}")]);
    }

    #[test]
    fn test_escaped_pipe_does_not_open_fallback() {
        assert!(matches!(
            parse(r"{{x\|y}}"),
            Err(ExpressionError::InvalidSegment { .. })
        ));

        let segments = parse(r"{{ x | \|y| }}").unwrap();
        assert_eq!(segments, vec![expr(&["x"], Some("|y|"), r"{{ x | \|y| }}")]);
    }

    #[test]
    fn test_empty_fallback() {
        let segments = parse("{{x|}}").unwrap();
        assert_eq!(segments, vec![expr(&["x"], Some(""), "{{x|}}")]);
    }

    #[test]
    fn test_escaped_open_braces() {
        let segments = parse(r"Use \{{name}} literally").unwrap();
        assert_eq!(
            segments,
            vec![Segment::Literal("Use {{name}} literally".to_string())]
        );
    }

    #[test]
    fn test_escapes_inside_fallback() {
        let segments = parse(r"{{x|a \}\} b \| c}}").unwrap();
        match &segments[0] {
            Segment::Expr(e) => assert_eq!(e.fallback.as_deref(), Some("a }} b | c")),
            other => panic!("unexpected segment {:?}", other),
        }
    }

    #[test]
    fn test_single_braces_are_literal() {
        let segments = parse("{not} an {expression}").unwrap();
        assert_eq!(
            segments,
            vec![Segment::Literal("{not} an {expression}".to_string())]
        );
    }

    #[test]
    fn test_unterminated() {
        assert_eq!(
            parse("Hi {{user.name"),
            Err(ExpressionError::Unterminated { offset: 3 })
        );
        assert_eq!(
            parse("{{x|\\"),
            Err(ExpressionError::Unterminated { offset: 0 })
        );
    }

    #[test]
    fn test_empty_path() {
        assert_eq!(
            parse("{{ }}"),
            Err(ExpressionError::EmptyPath { offset: 0 })
        );
        assert_eq!(
            parse("{{|fallback}}"),
            Err(ExpressionError::EmptyPath { offset: 0 })
        );
    }

    #[test]
    fn test_invalid_segments() {
        assert!(matches!(
            parse("{{user..name}}"),
            Err(ExpressionError::InvalidSegment { .. })
        ));
        assert!(matches!(
            parse("{{user name}}"),
            Err(ExpressionError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn test_numeric_segments_allowed() {
        let segments = parse("{{items.0.label}}").unwrap();
        assert_eq!(segments, vec![expr(&["items", "0", "label"], None, "{{items.0.label}}")]);
    }

    #[test]
    fn test_multibyte_text_around_expressions() {
        let segments = parse("¡Hola {{nombre|amigo}}! ✉").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Literal("¡Hola ".to_string()));
        assert_eq!(segments[2], Segment::Literal("! ✉".to_string()));
    }
}
