//! PostgreSQL-backed template repository.
//!
//! Tables:
//! - `templates` - one row per template key
//! - `template_locales` - overlays, removed with their template via `ON DELETE CASCADE`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use super::locale::LocaleSelector;
use super::store::{validate_overlay, TemplateRepository};
use super::types::{
    LocaleOverlay, Template, TemplateError, TemplateResult, TemplateSnapshot,
    UpdateTemplateRequest,
};

type TemplateRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Value,
    Value,
    DateTime<Utc>,
    DateTime<Utc>,
);

type OverlayRow = (String, String, Value, DateTime<Utc>, DateTime<Utc>);

/// Template + optional joined overlay columns
type SnapshotRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Value,
    Value,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<String>,
    Option<Value>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

const TEMPLATE_COLUMNS: &str =
    "key, name, description, category, base_structure, variable_schema, created_at, updated_at";

fn template_from_row(row: TemplateRow) -> TemplateResult<Template> {
    let (key, name, description, category, base_structure, schema, created_at, updated_at) = row;
    Ok(Template {
        key,
        name,
        description,
        category,
        base_structure,
        variable_schema: serde_json::from_value(schema)?,
        created_at,
        updated_at,
    })
}

fn overlay_from_row(row: OverlayRow) -> LocaleOverlay {
    let (template_key, locale, structure, created_at, updated_at) = row;
    LocaleOverlay {
        template_key,
        locale,
        structure,
        created_at,
        updated_at,
    }
}

pub struct PostgresTemplateStore {
    pool: PgPool,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PostgresTemplateStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn create(&self, template: Template) -> TemplateResult<Template> {
        template.validate()?;

        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO templates
                (key, name, description, category, base_structure, variable_schema, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(&template.key)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.category)
        .bind(&template.base_structure)
        .bind(serde_json::to_value(&template.variable_schema)?)
        .bind(template.created_at)
        .bind(template.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(_) => Ok(template),
            None => Err(TemplateError::AlreadyExists(template.key)),
        }
    }

    async fn get(&self, key: &str) -> TemplateResult<Template> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM templates WHERE key = $1",
            TEMPLATE_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(template_from_row)
            .transpose()?
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))
    }

    async fn list(&self) -> TemplateResult<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM templates ORDER BY key",
            TEMPLATE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(template_from_row).collect()
    }

    async fn update(&self, key: &str, updates: UpdateTemplateRequest) -> TemplateResult<Template> {
        let mut tx = self.pool.begin().await?;

        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM templates WHERE key = $1 FOR UPDATE",
            TEMPLATE_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let mut template = row
            .map(template_from_row)
            .transpose()?
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        updates.apply_to(&mut template);
        template.validate()?;

        sqlx::query(
            r#"
            UPDATE templates
            SET name = $2, description = $3, category = $4,
                base_structure = $5, variable_schema = $6, updated_at = $7
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.category)
        .bind(&template.base_structure)
        .bind(serde_json::to_value(&template.variable_schema)?)
        .bind(template.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(template)
    }

    async fn delete(&self, key: &str) -> TemplateResult<()> {
        let result = sqlx::query("DELETE FROM templates WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TemplateError::NotFound(key.to_string()));
        }

        Ok(())
    }

    async fn upsert_overlay(
        &self,
        key: &str,
        locale: &str,
        structure: Value,
    ) -> TemplateResult<LocaleOverlay> {
        validate_overlay(locale, &structure)?;

        // Inserts nothing when the template is missing
        let row: Option<OverlayRow> = sqlx::query_as(
            r#"
            INSERT INTO template_locales (template_key, locale, structure, created_at, updated_at)
            SELECT t.key, $2, $3, NOW(), NOW() FROM templates t WHERE t.key = $1
            ON CONFLICT (template_key, locale)
            DO UPDATE SET structure = EXCLUDED.structure, updated_at = EXCLUDED.updated_at
            RETURNING template_key, locale, structure, created_at, updated_at
            "#,
        )
        .bind(key)
        .bind(locale)
        .bind(&structure)
        .fetch_optional(&self.pool)
        .await?;

        row.map(overlay_from_row)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))
    }

    async fn get_overlay(&self, key: &str, locale: &str) -> TemplateResult<LocaleOverlay> {
        let row: Option<OverlayRow> = sqlx::query_as(
            r#"
            SELECT template_key, locale, structure, created_at, updated_at
            FROM template_locales
            WHERE template_key = $1 AND locale = $2
            "#,
        )
        .bind(key)
        .bind(locale)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(overlay_from_row(row)),
            None => {
                // Distinguish a missing template from a missing overlay
                self.get(key).await?;
                Err(TemplateError::OverlayNotFound {
                    key: key.to_string(),
                    locale: locale.to_string(),
                })
            }
        }
    }

    async fn list_overlays(&self, key: &str) -> TemplateResult<Vec<LocaleOverlay>> {
        self.get(key).await?;

        let rows: Vec<OverlayRow> = sqlx::query_as(
            r#"
            SELECT template_key, locale, structure, created_at, updated_at
            FROM template_locales
            WHERE template_key = $1
            ORDER BY locale
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(overlay_from_row).collect())
    }

    async fn delete_overlay(&self, key: &str, locale: &str) -> TemplateResult<()> {
        let result =
            sqlx::query("DELETE FROM template_locales WHERE template_key = $1 AND locale = $2")
                .bind(key)
                .bind(locale)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            self.get(key).await?;
            return Err(TemplateError::OverlayNotFound {
                key: key.to_string(),
                locale: locale.to_string(),
            });
        }

        Ok(())
    }

    async fn snapshot(
        &self,
        key: &str,
        selector: &LocaleSelector,
    ) -> TemplateResult<TemplateSnapshot> {
        let locale = match selector {
            LocaleSelector::UseBase => {
                return Ok(TemplateSnapshot {
                    template: self.get(key).await?,
                    overlay: None,
                });
            }
            LocaleSelector::UseLocale(code) => code,
        };

        // One statement, so base and overlay come from the same snapshot
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT t.key, t.name, t.description, t.category, t.base_structure,
                   t.variable_schema, t.created_at, t.updated_at,
                   l.locale, l.structure, l.created_at, l.updated_at
            FROM templates t
            LEFT JOIN template_locales l ON l.template_key = t.key AND l.locale = $2
            WHERE t.key = $1
            "#,
        )
        .bind(key)
        .bind(locale)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(TemplateError::NotFound(key.to_string()));
        };

        let (k, name, description, category, base, schema, created, updated, l, s, lc, lu) = row;
        let template = template_from_row((k, name, description, category, base, schema, created, updated))?;

        let overlay = match (l, s, lc, lu) {
            (Some(locale), Some(structure), Some(created_at), Some(updated_at)) => {
                Some(LocaleOverlay {
                    template_key: template.key.clone(),
                    locale,
                    structure,
                    created_at,
                    updated_at,
                })
            }
            _ => None,
        };

        Ok(TemplateSnapshot { template, overlay })
    }
}
