//! Template storage with CRUD operations

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::interpolate::check_structure;
use super::locale::LocaleSelector;
use super::types::{
    validate_overlay_locale, LocaleOverlay, Template, TemplateError, TemplateResult,
    TemplateSnapshot, UpdateTemplateRequest,
};

/// Persistent record of templates and their locale overlays
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Backend name for health reporting
    fn backend_name(&self) -> &'static str;

    async fn create(&self, template: Template) -> TemplateResult<Template>;

    async fn get(&self, key: &str) -> TemplateResult<Template>;

    /// All templates ordered by key
    async fn list(&self) -> TemplateResult<Vec<Template>>;

    async fn update(&self, key: &str, updates: UpdateTemplateRequest) -> TemplateResult<Template>;

    /// Delete a template and every overlay it owns
    async fn delete(&self, key: &str) -> TemplateResult<()>;

    /// Create or replace the overlay for `(key, locale)`
    async fn upsert_overlay(
        &self,
        key: &str,
        locale: &str,
        structure: Value,
    ) -> TemplateResult<LocaleOverlay>;

    async fn get_overlay(&self, key: &str, locale: &str) -> TemplateResult<LocaleOverlay>;

    /// Overlays of a template ordered by locale
    async fn list_overlays(&self, key: &str) -> TemplateResult<Vec<LocaleOverlay>>;

    async fn delete_overlay(&self, key: &str, locale: &str) -> TemplateResult<()>;

    /// Read the template and the selected overlay as one consistent view.
    ///
    /// `UseBase` never looks an overlay up. A locale without an overlay
    /// yields `overlay: None`.
    async fn snapshot(&self, key: &str, selector: &LocaleSelector)
        -> TemplateResult<TemplateSnapshot>;
}

/// Validate an overlay before it is stored
pub(crate) fn validate_overlay(locale: &str, structure: &Value) -> TemplateResult<()> {
    validate_overlay_locale(locale)?;

    if !structure.is_object() {
        return Err(TemplateError::InvalidTemplate(
            "Overlay structure must be an object".to_string(),
        ));
    }

    check_structure(structure)
}

struct TemplateEntry {
    template: Template,
    overlays: BTreeMap<String, LocaleOverlay>,
}

/// In-memory template storage
pub struct MemoryTemplateStore {
    templates: DashMap<String, TemplateEntry>,
}

impl Default for MemoryTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTemplateStore {
    /// Create a new template store
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    /// Get the number of templates
    pub fn count(&self) -> usize {
        self.templates.len()
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, template: Template) -> TemplateResult<Template> {
        template.validate()?;

        match self.templates.entry(template.key.clone()) {
            Entry::Occupied(_) => Err(TemplateError::AlreadyExists(template.key)),
            Entry::Vacant(slot) => {
                slot.insert(TemplateEntry {
                    template: template.clone(),
                    overlays: BTreeMap::new(),
                });
                Ok(template)
            }
        }
    }

    async fn get(&self, key: &str) -> TemplateResult<Template> {
        self.templates
            .get(key)
            .map(|entry| entry.template.clone())
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))
    }

    async fn list(&self) -> TemplateResult<Vec<Template>> {
        let mut templates: Vec<Template> = self
            .templates
            .iter()
            .map(|entry| entry.value().template.clone())
            .collect();
        templates.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(templates)
    }

    async fn update(&self, key: &str, updates: UpdateTemplateRequest) -> TemplateResult<Template> {
        let mut entry = self
            .templates
            .get_mut(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        let mut template = entry.template.clone();
        updates.apply_to(&mut template);
        template.validate()?;

        entry.template = template.clone();
        Ok(template)
    }

    async fn delete(&self, key: &str) -> TemplateResult<()> {
        self.templates
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))
    }

    async fn upsert_overlay(
        &self,
        key: &str,
        locale: &str,
        structure: Value,
    ) -> TemplateResult<LocaleOverlay> {
        validate_overlay(locale, &structure)?;

        let mut entry = self
            .templates
            .get_mut(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        let now = Utc::now();
        let created_at = entry
            .overlays
            .get(locale)
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let overlay = LocaleOverlay {
            template_key: key.to_string(),
            locale: locale.to_string(),
            structure,
            created_at,
            updated_at: now,
        };
        entry.overlays.insert(locale.to_string(), overlay.clone());

        Ok(overlay)
    }

    async fn get_overlay(&self, key: &str, locale: &str) -> TemplateResult<LocaleOverlay> {
        let entry = self
            .templates
            .get(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        entry
            .overlays
            .get(locale)
            .cloned()
            .ok_or_else(|| TemplateError::OverlayNotFound {
                key: key.to_string(),
                locale: locale.to_string(),
            })
    }

    async fn list_overlays(&self, key: &str) -> TemplateResult<Vec<LocaleOverlay>> {
        self.templates
            .get(key)
            .map(|entry| entry.overlays.values().cloned().collect())
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))
    }

    async fn delete_overlay(&self, key: &str, locale: &str) -> TemplateResult<()> {
        let mut entry = self
            .templates
            .get_mut(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        entry
            .overlays
            .remove(locale)
            .map(|_| ())
            .ok_or_else(|| TemplateError::OverlayNotFound {
                key: key.to_string(),
                locale: locale.to_string(),
            })
    }

    async fn snapshot(
        &self,
        key: &str,
        selector: &LocaleSelector,
    ) -> TemplateResult<TemplateSnapshot> {
        let entry = self
            .templates
            .get(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        let overlay = match selector {
            LocaleSelector::UseBase => None,
            LocaleSelector::UseLocale(code) => entry.overlays.get(code).cloned(),
        };

        Ok(TemplateSnapshot {
            template: entry.template.clone(),
            overlay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::types::CreateTemplateRequest;
    use crate::template::VariableSchema;
    use serde_json::json;

    fn welcome() -> Template {
        Template::from(CreateTemplateRequest {
            key: "welcome".to_string(),
            name: "Welcome".to_string(),
            description: None,
            category: None,
            base_structure: json!({"title": "Hi {{user.name|there}}", "footer": "Bye"}),
            variable_schema: VariableSchema::default(),
        })
    }

    #[tokio::test]
    async fn test_store_create_and_get() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();

        let fetched = store.get("welcome").await.unwrap();
        assert_eq!(fetched.name, "Welcome");
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_store_duplicate_key() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();

        let result = store.create(welcome()).await;
        assert!(matches!(result, Err(TemplateError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_store_update_rejects_invalid_structure() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();

        let updates = UpdateTemplateRequest {
            base_structure: Some(json!({"title": "{{broken"})),
            ..Default::default()
        };
        let result = store.update("welcome", updates).await;
        assert!(matches!(result, Err(TemplateError::Expression { .. })));

        // Stored template untouched
        let fetched = store.get("welcome").await.unwrap();
        assert_eq!(fetched.base_structure["title"], "Hi {{user.name|there}}");
    }

    #[tokio::test]
    async fn test_store_update_replaces_structure() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();

        let updates = UpdateTemplateRequest {
            base_structure: Some(json!({"title": "New"})),
            ..Default::default()
        };
        let updated = store.update("welcome", updates).await.unwrap();
        assert_eq!(updated.base_structure, json!({"title": "New"}));
    }

    #[tokio::test]
    async fn test_delete_cascades_overlays() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();
        store
            .upsert_overlay("welcome", "es", json!({"footer": "Adiós"}))
            .await
            .unwrap();

        store.delete("welcome").await.unwrap();
        assert!(matches!(
            store.list_overlays("welcome").await,
            Err(TemplateError::NotFound(_))
        ));

        // Re-created template starts with no overlays
        store.create(welcome()).await.unwrap();
        assert!(store.list_overlays("welcome").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlay_upsert_keeps_created_at() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();

        let first = store
            .upsert_overlay("welcome", "es", json!({"footer": "Adiós"}))
            .await
            .unwrap();
        let second = store
            .upsert_overlay("welcome", "es", json!({"footer": "Chau"}))
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(
            store.get_overlay("welcome", "es").await.unwrap().structure,
            json!({"footer": "Chau"})
        );
    }

    #[tokio::test]
    async fn test_overlay_validation() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();

        assert!(matches!(
            store.upsert_overlay("welcome", "__base__", json!({})).await,
            Err(TemplateError::InvalidLocale(_))
        ));
        assert!(matches!(
            store.upsert_overlay("welcome", "es", json!("title")).await,
            Err(TemplateError::InvalidTemplate(_))
        ));
        assert!(matches!(
            store.upsert_overlay("missing", "es", json!({})).await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_selects_overlay() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();
        store
            .upsert_overlay("welcome", "es", json!({"footer": "Adiós"}))
            .await
            .unwrap();

        let base = store.snapshot("welcome", &LocaleSelector::UseBase).await.unwrap();
        assert!(base.overlay.is_none());

        let es = store
            .snapshot("welcome", &LocaleSelector::UseLocale("es".into()))
            .await
            .unwrap();
        assert_eq!(es.overlay.unwrap().locale, "es");

        let fr = store
            .snapshot("welcome", &LocaleSelector::UseLocale("fr".into()))
            .await
            .unwrap();
        assert!(fr.overlay.is_none());

        assert!(matches!(
            store.snapshot("nope", &LocaleSelector::UseBase).await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_overlay() {
        let store = MemoryTemplateStore::new();
        store.create(welcome()).await.unwrap();
        store
            .upsert_overlay("welcome", "es", json!({}))
            .await
            .unwrap();

        store.delete_overlay("welcome", "es").await.unwrap();
        assert!(matches!(
            store.delete_overlay("welcome", "es").await,
            Err(TemplateError::OverlayNotFound { .. })
        ));
    }
}
