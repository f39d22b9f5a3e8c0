//! Template types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::expression::ExpressionError;
use super::locale::BASE_LOCALE;
use super::schema::VariableSchema;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid template key: {0}")]
    InvalidKey(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid locale: {0}")]
    InvalidLocale(String),

    #[error("No overlay for locale '{locale}' on template '{key}'")]
    OverlayNotFound { key: String, locale: String },

    #[error("Invalid expression at {location}: {source}")]
    Expression {
        location: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Template storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for TemplateError {
    fn from(err: sqlx::Error) -> Self {
        TemplateError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(err: serde_json::Error) -> Self {
        TemplateError::Storage(format!("Corrupt template record: {}", err))
    }
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// An email template: a base section structure plus its variable contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Unique, immutable caller-facing key (alphanumeric, dash, underscore)
    pub key: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Nested section mapping; string leaves may hold `{{path|fallback}}` expressions
    pub base_structure: serde_json::Value,

    #[serde(default)]
    pub variable_schema: VariableSchema,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Validate the template
    pub fn validate(&self) -> TemplateResult<()> {
        validate_key(&self.key)?;

        if self.name.is_empty() || self.name.len() > 256 {
            return Err(TemplateError::InvalidTemplate(
                "Name must be 1-256 characters".to_string(),
            ));
        }

        if !self.base_structure.is_object() {
            return Err(TemplateError::InvalidTemplate(
                "baseStructure must be an object".to_string(),
            ));
        }

        super::interpolate::check_structure(&self.base_structure)?;

        Ok(())
    }
}

/// Validate a template key
pub fn validate_key(key: &str) -> TemplateResult<()> {
    if key.is_empty() || key.len() > 64 {
        return Err(TemplateError::InvalidKey(
            "Key must be 1-64 characters".to_string(),
        ));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TemplateError::InvalidKey(
            "Key must contain only alphanumeric, dash, or underscore".to_string(),
        ));
    }

    Ok(())
}

/// Validate a locale code that is about to be stored as an overlay
pub fn validate_overlay_locale(locale: &str) -> TemplateResult<()> {
    if locale == BASE_LOCALE {
        return Err(TemplateError::InvalidLocale(format!(
            "'{}' is reserved and cannot hold an overlay",
            BASE_LOCALE
        )));
    }

    super::locale::validate_locale_code(locale)
}

/// A locale-specific partial structure merged on top of the base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleOverlay {
    pub template_key: String,
    pub locale: String,
    pub structure: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Base template plus the overlay selected for one render, read together
#[derive(Debug, Clone)]
pub struct TemplateSnapshot {
    pub template: Template,
    pub overlay: Option<LocaleOverlay>,
}

/// Request to create a new template
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub base_structure: serde_json::Value,
    #[serde(default)]
    pub variable_schema: VariableSchema,
}

impl From<CreateTemplateRequest> for Template {
    fn from(req: CreateTemplateRequest) -> Self {
        let now = Utc::now();
        Template {
            key: req.key,
            name: req.name,
            description: req.description,
            category: req.category,
            base_structure: req.base_structure,
            variable_schema: req.variable_schema,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request to update an existing template.
///
/// `baseStructure` and `variableSchema` replace the stored values wholesale.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,

    /// Use null to clear
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    /// Use null to clear
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,

    pub base_structure: Option<serde_json::Value>,

    pub variable_schema: Option<VariableSchema>,
}

impl UpdateTemplateRequest {
    /// Apply the update to a stored template
    pub fn apply_to(self, template: &mut Template) {
        if let Some(name) = self.name {
            template.name = name;
        }

        if let Some(description) = self.description {
            template.description = description;
        }

        if let Some(category) = self.category {
            template.category = category;
        }

        if let Some(base_structure) = self.base_structure {
            template.base_structure = base_structure;
        }

        if let Some(schema) = self.variable_schema {
            template.variable_schema = schema;
        }

        template.updated_at = Utc::now();
    }
}

/// Distinguishes an absent field from an explicit null
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Request to create or replace a locale overlay
#[derive(Debug, Deserialize)]
pub struct UpsertOverlayRequest {
    pub structure: serde_json::Value,
}

/// Response for listing templates
#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<Template>,
    pub total: usize,
}
