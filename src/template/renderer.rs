//! Resolve + validate + interpolate + compose, from one template snapshot

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::compose::compose;
use super::interpolate::{render, render_str, RenderWarning};
use super::locale::{resolve, LocaleSelector, ResolvedTemplate};
use super::schema::ValidationReport;
use super::store::TemplateRepository;
use super::types::TemplateResult;

/// Final content for one email
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEmail {
    pub template_key: String,
    /// Overlay locale that was merged, absent when the base was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_locale: Option<String>,
    pub subject: String,
    pub structure: Value,
    pub html: String,
    pub text: String,
    pub warnings: Vec<RenderWarning>,
    /// Schema check of the variables this render used
    pub validation: ValidationReport,
}

#[derive(Clone)]
pub struct TemplateRenderer {
    repo: Arc<dyn TemplateRepository>,
}

impl TemplateRenderer {
    pub fn new(repo: Arc<dyn TemplateRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn TemplateRepository> {
        &self.repo
    }

    /// Merged structure for a template and locale
    pub async fn resolve(
        &self,
        key: &str,
        selector: &LocaleSelector,
    ) -> TemplateResult<ResolvedTemplate> {
        resolve(self.repo.as_ref(), key, selector).await
    }

    /// Check variables against the template's schema
    pub async fn validate(&self, key: &str, variables: &Value) -> TemplateResult<ValidationReport> {
        let template = self.repo.get(key).await?;
        Ok(template.variable_schema.validate(variables))
    }

    /// Render a complete email. Schema failures are reported in
    /// `validation`, not as an error; callers decide whether they block.
    pub async fn render_email(
        &self,
        key: &str,
        selector: &LocaleSelector,
        subject: &str,
        variables: &Value,
    ) -> TemplateResult<RenderedEmail> {
        let resolved = self.resolve(key, selector).await?;
        let validation = resolved.template.variable_schema.validate(variables);

        let rendered = render(&resolved.structure, variables)?;
        let (subject, subject_warnings) = render_str(subject, variables, "subject")?;

        let mut warnings = subject_warnings;
        warnings.extend(rendered.warnings);

        let body = compose(&subject, &rendered.value);

        Ok(RenderedEmail {
            template_key: resolved.template.key,
            applied_locale: resolved.applied_locale,
            subject,
            structure: rendered.value,
            html: body.html,
            text: body.text,
            warnings,
            validation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{CreateTemplateRequest, MemoryTemplateStore, Template, TemplateError};
    use serde_json::json;

    async fn renderer() -> TemplateRenderer {
        let store = Arc::new(MemoryTemplateStore::new());
        let request: CreateTemplateRequest = serde_json::from_value(json!({
            "key": "welcome",
            "name": "Welcome",
            "baseStructure": {"title": "Hi {{user.name|there}}", "footer": "Thanks"},
            "variableSchema": {"required": ["user"], "fields": {"user.name": "string"}}
        }))
        .unwrap();
        store.create(Template::from(request)).await.unwrap();
        store
            .upsert_overlay("welcome", "es", json!({"footer": "Gracias"}))
            .await
            .unwrap();
        TemplateRenderer::new(store)
    }

    #[tokio::test]
    async fn test_overlay_without_title_uses_base_interpolation() {
        let renderer = renderer().await;
        let es = LocaleSelector::UseLocale("es".to_string());

        let email = renderer
            .render_email("welcome", &es, "Hello", &json!({"user": {"name": "Ana"}}))
            .await
            .unwrap();
        assert_eq!(email.structure["title"], "Hi Ana");
        assert_eq!(email.structure["footer"], "Gracias");
        assert_eq!(email.applied_locale.as_deref(), Some("es"));

        let email = renderer
            .render_email("welcome", &es, "Hello", &json!({}))
            .await
            .unwrap();
        assert_eq!(email.structure["title"], "Hi there");
        assert!(!email.validation.valid);
    }

    #[tokio::test]
    async fn test_missing_locale_falls_back_to_base() {
        let renderer = renderer().await;
        let email = renderer
            .render_email(
                "welcome",
                &LocaleSelector::UseLocale("de".to_string()),
                "Hello",
                &json!({"user": {"name": "Jo"}}),
            )
            .await
            .unwrap();
        assert_eq!(email.structure["footer"], "Thanks");
        assert!(email.applied_locale.is_none());
    }

    #[tokio::test]
    async fn test_subject_interpolated_and_body_composed() {
        let renderer = renderer().await;
        let email = renderer
            .render_email(
                "welcome",
                &LocaleSelector::UseBase,
                "Welcome {{user.name}}",
                &json!({"user": {"name": "Ana"}}),
            )
            .await
            .unwrap();
        assert_eq!(email.subject, "Welcome Ana");
        assert!(email.html.contains("<h1>Hi Ana</h1>"));
        assert!(email.text.contains("Thanks"));
        assert!(email.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_subject_warning_recorded() {
        let renderer = renderer().await;
        let email = renderer
            .render_email("welcome", &LocaleSelector::UseBase, "For {{who}}", &json!({}))
            .await
            .unwrap();
        assert_eq!(email.subject, "For ");
        assert_eq!(email.warnings.len(), 1);
        assert_eq!(email.warnings[0].location, "subject");
    }

    #[tokio::test]
    async fn test_unknown_template() {
        let renderer = renderer().await;
        let result = renderer
            .render_email("nope", &LocaleSelector::UseBase, "s", &json!({}))
            .await;
        assert!(matches!(result, Err(TemplateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validate_by_key() {
        let renderer = renderer().await;
        let report = renderer
            .validate("welcome", &json!({"user": {"name": 1}}))
            .await
            .unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field, "user.name");
    }
}
