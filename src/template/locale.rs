//! Locale selection and overlay merging

use serde_json::Value;

use super::store::TemplateRepository;
use super::types::{Template, TemplateError, TemplateResult, TemplateSnapshot};

/// Sentinel locale meaning "the base structure, no overlay"
pub const BASE_LOCALE: &str = "__base__";

const MAX_LOCALE_LEN: usize = 35;

/// Which structure a render should use, decided once at the API boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocaleSelector {
    UseBase,
    UseLocale(String),
}

impl LocaleSelector {
    /// Build a selector from the locale a caller supplied.
    ///
    /// An absent or empty locale and the `__base__` sentinel both select the base.
    pub fn from_request(locale: Option<&str>) -> TemplateResult<Self> {
        match locale.map(str::trim) {
            None | Some("") => Ok(Self::UseBase),
            Some(BASE_LOCALE) => Ok(Self::UseBase),
            Some(code) => {
                validate_locale_code(code)?;
                Ok(Self::UseLocale(code.to_string()))
            }
        }
    }

    /// The overlay locale to look up, if any
    pub fn locale(&self) -> Option<&str> {
        match self {
            Self::UseBase => None,
            Self::UseLocale(code) => Some(code),
        }
    }

    pub fn as_str(&self) -> &str {
        self.locale().unwrap_or(BASE_LOCALE)
    }
}

/// Validate a locale code (`es`, `pt-BR`, `zh_Hant`)
pub fn validate_locale_code(code: &str) -> TemplateResult<()> {
    if code.is_empty() || code.len() > MAX_LOCALE_LEN {
        return Err(TemplateError::InvalidLocale(format!(
            "Locale must be 1-{} characters",
            MAX_LOCALE_LEN
        )));
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TemplateError::InvalidLocale(format!(
            "Locale '{}' contains invalid characters",
            code
        )));
    }

    Ok(())
}

/// Recursively merge `overlay` onto `base`.
///
/// Mappings present on both sides merge key by key; anything else in the
/// overlay (scalars, arrays, null) replaces the base value outright.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let value = match base_map.get(key) {
                    Some(base_value) if base_value.is_object() && overlay_value.is_object() => {
                        deep_merge(base_value, overlay_value)
                    }
                    _ => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Structure a render should use, with the template it came from
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub template: Template,
    pub structure: Value,
    /// Locale of the overlay that was merged, `None` when the base was used
    pub applied_locale: Option<String>,
}

impl From<TemplateSnapshot> for ResolvedTemplate {
    fn from(snapshot: TemplateSnapshot) -> Self {
        let TemplateSnapshot { template, overlay } = snapshot;
        match overlay {
            Some(overlay) => ResolvedTemplate {
                structure: deep_merge(&template.base_structure, &overlay.structure),
                applied_locale: Some(overlay.locale),
                template,
            },
            None => ResolvedTemplate {
                structure: template.base_structure.clone(),
                applied_locale: None,
                template,
            },
        }
    }
}

/// Resolve the merged structure for a template and locale.
///
/// A locale without an overlay silently falls back to the base.
pub async fn resolve(
    repo: &dyn TemplateRepository,
    key: &str,
    selector: &LocaleSelector,
) -> TemplateResult<ResolvedTemplate> {
    let snapshot = repo.snapshot(key, selector).await?;
    Ok(ResolvedTemplate::from(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selector_from_request() {
        assert_eq!(LocaleSelector::from_request(None).unwrap(), LocaleSelector::UseBase);
        assert_eq!(LocaleSelector::from_request(Some("")).unwrap(), LocaleSelector::UseBase);
        assert_eq!(
            LocaleSelector::from_request(Some("__base__")).unwrap(),
            LocaleSelector::UseBase
        );
        assert_eq!(
            LocaleSelector::from_request(Some("es")).unwrap(),
            LocaleSelector::UseLocale("es".to_string())
        );
        assert!(LocaleSelector::from_request(Some("e s")).is_err());
        assert!(LocaleSelector::from_request(Some(&"x".repeat(36))).is_err());
    }

    #[test]
    fn test_selector_as_str() {
        assert_eq!(LocaleSelector::UseBase.as_str(), "__base__");
        assert_eq!(LocaleSelector::UseLocale("fr".into()).as_str(), "fr");
        assert_eq!(LocaleSelector::UseBase.locale(), None);
    }

    #[test]
    fn test_overlay_wins_for_conflicting_leaves() {
        let base = json!({"title": "Hi", "hero": {"title": "A", "subtitle": "B"}});
        let overlay = json!({"hero": {"title": "Hola"}});
        assert_eq!(
            deep_merge(&base, &overlay),
            json!({"title": "Hi", "hero": {"title": "Hola", "subtitle": "B"}})
        );
    }

    #[test]
    fn test_empty_overlay_yields_base() {
        let base = json!({"title": "Hi", "actions": [{"label": "Go"}]});
        assert_eq!(deep_merge(&base, &json!({})), base);
    }

    #[test]
    fn test_arrays_replaced_wholesale() {
        let base = json!({"actions": [{"label": "One"}, {"label": "Two"}]});
        let overlay = json!({"actions": [{"label": "Uno"}]});
        assert_eq!(
            deep_merge(&base, &overlay),
            json!({"actions": [{"label": "Uno"}]})
        );
    }

    #[test]
    fn test_scalar_replaces_mapping_and_back() {
        let base = json!({"footer": {"text": "x"}, "header": "plain"});
        let overlay = json!({"footer": "simple", "header": {"text": "rich"}});
        assert_eq!(deep_merge(&base, &overlay), overlay);
    }

    #[test]
    fn test_merge_associative_for_independent_keys() {
        let base = json!({"a": {"x": 1}, "b": 2});
        let o1 = json!({"a": {"y": 3}});
        let o2 = json!({"c": {"z": 4}});

        let left = deep_merge(&deep_merge(&base, &o1), &o2);
        let right = deep_merge(&base, &deep_merge(&o1, &o2));
        assert_eq!(left, right);
        assert_eq!(left, json!({"a": {"x": 1, "y": 3}, "b": 2, "c": {"z": 4}}));
    }
}
