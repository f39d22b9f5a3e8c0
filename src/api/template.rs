//! Template and locale overlay endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::server::AppState;
use crate::template::{
    CreateTemplateRequest, LocaleOverlay, LocaleSelector, RenderedEmail, Template,
    TemplateListResponse, UpdateTemplateRequest, UpsertOverlayRequest,
};

use super::extract::json_body;

/// POST /templates - Create a new template
#[tracing::instrument(name = "http.create_template", skip(state, payload))]
pub async fn create_template(
    State(state): State<AppState>,
    payload: Result<Json<CreateTemplateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Template>), AppError> {
    let request = json_body(payload)?;
    let created = state.templates.create(request.into()).await?;
    tracing::info!(template_key = %created.key, "Template created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /templates - List all templates
#[tracing::instrument(name = "http.list_templates", skip(state))]
pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<TemplateListResponse>, AppError> {
    let templates = state.templates.list().await?;
    let total = templates.len();

    Ok(Json(TemplateListResponse { templates, total }))
}

/// GET /templates/{key} - Get a specific template
#[tracing::instrument(name = "http.get_template", skip(state))]
pub async fn get_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Template>, AppError> {
    Ok(Json(state.templates.get(&key).await?))
}

/// PUT /templates/{key} - Update an existing template
#[tracing::instrument(name = "http.update_template", skip(state, payload))]
pub async fn update_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<UpdateTemplateRequest>, JsonRejection>,
) -> Result<Json<Template>, AppError> {
    let request = json_body(payload)?;
    Ok(Json(state.templates.update(&key, request).await?))
}

/// DELETE /templates/{key} - Delete a template and its overlays
#[tracing::instrument(name = "http.delete_template", skip(state))]
pub async fn delete_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.templates.delete(&key).await?;
    tracing::info!(template_key = %key, "Template deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /templates/{key}/locales - List a template's overlays
#[tracing::instrument(name = "http.list_overlays", skip(state))]
pub async fn list_overlays(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<LocaleOverlay>>, AppError> {
    Ok(Json(state.templates.list_overlays(&key).await?))
}

/// GET /templates/{key}/locales/{locale}
#[tracing::instrument(name = "http.get_overlay", skip(state))]
pub async fn get_overlay(
    State(state): State<AppState>,
    Path((key, locale)): Path<(String, String)>,
) -> Result<Json<LocaleOverlay>, AppError> {
    Ok(Json(state.templates.get_overlay(&key, &locale).await?))
}

/// PUT /templates/{key}/locales/{locale} - Create or replace an overlay
#[tracing::instrument(name = "http.upsert_overlay", skip(state, payload))]
pub async fn upsert_overlay(
    State(state): State<AppState>,
    Path((key, locale)): Path<(String, String)>,
    payload: Result<Json<UpsertOverlayRequest>, JsonRejection>,
) -> Result<Json<LocaleOverlay>, AppError> {
    let request = json_body(payload)?;
    let overlay = state
        .templates
        .upsert_overlay(&key, &locale, request.structure)
        .await?;
    tracing::info!(template_key = %key, locale = %locale, "Locale overlay stored");
    Ok(Json(overlay))
}

/// DELETE /templates/{key}/locales/{locale}
#[tracing::instrument(name = "http.delete_overlay", skip(state))]
pub async fn delete_overlay(
    State(state): State<AppState>,
    Path((key, locale)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.templates.delete_overlay(&key, &locale).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body of a render preview
#[derive(Debug, Deserialize)]
pub struct RenderPreviewRequest {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "empty_object")]
    pub variables: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// POST /templates/{key}/render - Render without sending.
///
/// Schema failures are reported in `validation` instead of rejecting the call.
#[tracing::instrument(name = "http.render_template", skip(state, payload))]
pub async fn render_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<RenderPreviewRequest>, JsonRejection>,
) -> Result<Json<RenderedEmail>, AppError> {
    let request = json_body(payload)?;
    if !request.variables.is_object() {
        return Err(AppError::Validation("variables must be an object".to_string()));
    }

    let selector = LocaleSelector::from_request(request.locale.as_deref())?;
    let subject = request.subject.unwrap_or_default();
    let rendered = state
        .renderer
        .render_email(&key, &selector, &subject, &request.variables)
        .await?;

    Ok(Json(rendered))
}
