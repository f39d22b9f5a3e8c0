//! Email template system.
//!
//! This module provides:
//! - Template and locale overlay definitions with `{{path|fallback}}` expressions
//! - Memory and PostgreSQL repositories
//! - Locale resolution (`__base__` sentinel, silent fallback, deep merge)
//! - Variable interpolation and shallow schema validation
//! - Composition of the rendered structure into HTML and text bodies
//!
//! # Example
//!
//! ```ignore
//! let repo = Arc::new(MemoryTemplateStore::new());
//! repo.create(Template::from(request)).await?;
//! repo.upsert_overlay("welcome", "es", json!({"footer": "Gracias"})).await?;
//!
//! let renderer = TemplateRenderer::new(repo);
//! let selector = LocaleSelector::from_request(Some("es"))?;
//! let email = renderer
//!     .render_email("welcome", &selector, "Hi {{user.name}}", &json!({"user": {"name": "Ana"}}))
//!     .await?;
//! ```

pub mod compose;
pub mod expression;
mod factory;
pub mod interpolate;
pub mod locale;
mod postgres_store;
mod renderer;
pub mod schema;
mod store;
mod types;

pub use expression::ExpressionError;
pub use factory::create_template_repository;
pub use interpolate::{render, RenderWarning, Rendered};
pub use locale::{deep_merge, LocaleSelector, ResolvedTemplate, BASE_LOCALE};
pub use postgres_store::PostgresTemplateStore;
pub use renderer::{RenderedEmail, TemplateRenderer};
pub use schema::{FieldError, FieldType, ValidationReport, VariableSchema};
pub use store::{MemoryTemplateStore, TemplateRepository};
pub use types::{
    CreateTemplateRequest, LocaleOverlay, Template, TemplateError, TemplateListResponse,
    TemplateResult, TemplateSnapshot, UpdateTemplateRequest, UpsertOverlayRequest,
};
