//! Request and response models for the send API

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::message::MessageStatus;

/// Maximum recipients per email
pub const MAX_RECIPIENTS: usize = 50;

/// Maximum `Idempotency-Key` length
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Template reference in a send request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRef {
    pub key: String,
    /// Overlay locale; absent or `__base__` renders the base structure
    #[serde(default)]
    pub locale: Option<String>,
}

/// `POST /emails` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailRequest {
    pub to: Vec<String>,
    /// Sender; defaults to the provider's configured address
    #[serde(default)]
    pub from: Option<String>,
    /// Subject line, may contain `{{path|fallback}}` expressions
    pub subject: String,
    pub template: TemplateRef,
    #[serde(default = "empty_object")]
    pub variables: Value,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl SendEmailRequest {
    /// Shape checks that need no template. Returns the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if self.to.is_empty() {
            return Err("at least one recipient is required".into());
        }
        if self.to.len() > MAX_RECIPIENTS {
            return Err(format!("at most {} recipients are allowed", MAX_RECIPIENTS));
        }
        if let Some(bad) = self.to.iter().find(|addr| !looks_like_address(addr)) {
            return Err(format!("invalid recipient address '{}'", bad));
        }
        if let Some(from) = &self.from {
            if !looks_like_address(from) {
                return Err(format!("invalid sender address '{}'", from));
            }
        }
        if self.subject.trim().is_empty() {
            return Err("subject must not be empty".into());
        }
        if self.template.key.trim().is_empty() {
            return Err("template.key must not be empty".into());
        }
        if !self.variables.is_object() {
            return Err("variables must be an object".into());
        }
        if !self.metadata.is_object() {
            return Err("metadata must be an object".into());
        }
        Ok(())
    }
}

fn looks_like_address(addr: &str) -> bool {
    let addr = addr.trim();
    match addr.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// Validate an `Idempotency-Key` header value
pub fn check_idempotency_key(key: &str) -> Result<(), String> {
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(format!(
            "Idempotency-Key must be 1-{} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        ));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err("Idempotency-Key must not contain control characters".into());
    }
    Ok(())
}

/// `POST /emails` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    pub message_id: Uuid,
    pub status: MessageStatus,
    pub idempotent_replay: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> SendEmailRequest {
        serde_json::from_value(value).unwrap()
    }

    fn valid() -> Value {
        json!({
            "to": ["ana@example.com"],
            "subject": "Welcome",
            "template": {"key": "welcome", "locale": "es"},
            "variables": {"user": {"name": "Ana"}}
        })
    }

    #[test]
    fn test_defaults() {
        let req = request(json!({
            "to": ["a@b.c"],
            "subject": "s",
            "template": {"key": "welcome"}
        }));
        assert!(req.template.locale.is_none());
        assert_eq!(req.variables, json!({}));
        assert_eq!(req.metadata, json!({}));
        assert!(req.check().is_ok());
    }

    #[test]
    fn test_valid_request() {
        assert!(request(valid()).check().is_ok());
    }

    #[test]
    fn test_recipient_rules() {
        let mut req = request(valid());
        req.to.clear();
        assert!(req.check().unwrap_err().contains("at least one"));

        req.to = (0..51).map(|i| format!("u{}@example.com", i)).collect();
        assert!(req.check().unwrap_err().contains("at most 50"));

        req.to = vec!["not-an-address".into()];
        assert!(req.check().unwrap_err().contains("not-an-address"));
    }

    #[test]
    fn test_subject_and_variables() {
        let mut req = request(valid());
        req.subject = "   ".into();
        assert!(req.check().is_err());

        let mut req = request(valid());
        req.variables = json!(["x"]);
        assert_eq!(req.check().unwrap_err(), "variables must be an object");
    }

    #[test]
    fn test_idempotency_key_rules() {
        assert!(check_idempotency_key("order-42").is_ok());
        assert!(check_idempotency_key("").is_err());
        assert!(check_idempotency_key(&"k".repeat(255)).is_ok());
        assert!(check_idempotency_key(&"k".repeat(256)).is_err());
        assert!(check_idempotency_key("a\nb").is_err());
    }
}
