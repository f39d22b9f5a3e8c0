//! Provider payload normalization.
//!
//! Each provider has its own webhook shape; everything is reduced to an
//! [`InboundEvent`] before it reaches the state machine.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::message::{EventType, InboundEvent, MessageRef, StoreError};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid provider name: {0}")]
    InvalidProvider(String),

    #[error("Webhook body must be a JSON object or array")]
    InvalidBody,

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

pub type WebhookResult<T> = Result<T, WebhookError>;

/// One webhook item after normalization
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Event(InboundEvent),
    /// Event kind this service does not track
    Ignored { event: String },
}

/// Provider names become metric labels and index keys
pub fn validate_provider(provider: &str) -> WebhookResult<()> {
    let valid = !provider.is_empty()
        && provider.len() <= 64
        && provider
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(WebhookError::InvalidProvider(provider.to_string()))
    }
}

/// Split a webhook body into items: one object, or an array of them
pub fn split_batch(body: Value) -> WebhookResult<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        item @ Value::Object(_) => Ok(vec![item]),
        _ => Err(WebhookError::InvalidBody),
    }
}

/// Normalize one item in the format `provider` sends
pub fn normalize(provider: &str, item: &Value) -> WebhookResult<Normalized> {
    if !item.is_object() {
        return Err(WebhookError::InvalidBody);
    }

    match provider {
        "sendgrid" => normalize_sendgrid(item),
        _ => normalize_generic(provider, item),
    }
}

/// Map a provider event name onto a tracked kind
fn event_type(name: &str) -> Option<EventType> {
    let event = match name.to_ascii_lowercase().as_str() {
        "processed" => EventType::Processed,
        "deferred" => EventType::Deferred,
        "delivered" => EventType::Delivered,
        "bounce" | "bounced" => EventType::Bounced,
        "dropped" | "failed" => EventType::Failed,
        "open" | "opened" => EventType::Opened,
        "click" | "clicked" => EventType::Clicked,
        _ => return None,
    };
    Some(event)
}

fn normalize_sendgrid(item: &Value) -> WebhookResult<Normalized> {
    let name = str_field(item, "event").ok_or(WebhookError::MissingField("event"))?;
    let Some(event_type) = event_type(name) else {
        return Ok(Normalized::Ignored {
            event: name.to_string(),
        });
    };

    let provider_event_id = str_field(item, "sg_event_id")
        .ok_or(WebhookError::MissingField("sg_event_id"))?
        .to_string();

    // Our own id travels as a custom arg when the sender set one
    let message = match str_field(item, "message_id").and_then(|s| Uuid::parse_str(s).ok()) {
        Some(id) => MessageRef::Id(id),
        None => {
            let sg_message_id = str_field(item, "sg_message_id")
                .ok_or(WebhookError::MissingField("sg_message_id"))?;
            let provider_id = sg_message_id.split('.').next().unwrap_or(sg_message_id);
            if provider_id.is_empty() {
                return Err(WebhookError::InvalidField {
                    field: "sg_message_id",
                    reason: "empty".into(),
                });
            }
            MessageRef::ProviderMessageId(provider_id.to_string())
        }
    };

    Ok(Normalized::Event(InboundEvent {
        provider: "sendgrid".to_string(),
        message,
        event_type,
        provider_event_id,
        occurred_at: timestamp(item)?,
        raw_payload: item.clone(),
    }))
}

fn normalize_generic(provider: &str, item: &Value) -> WebhookResult<Normalized> {
    let name = str_field(item, "eventType").ok_or(WebhookError::MissingField("eventType"))?;
    let Some(event_type) = event_type(name) else {
        return Ok(Normalized::Ignored {
            event: name.to_string(),
        });
    };

    let provider_event_id = str_field(item, "eventId")
        .ok_or(WebhookError::MissingField("eventId"))?
        .to_string();

    let message = if let Some(raw) = str_field(item, "messageId") {
        let id = Uuid::parse_str(raw).map_err(|e| WebhookError::InvalidField {
            field: "messageId",
            reason: e.to_string(),
        })?;
        MessageRef::Id(id)
    } else if let Some(pid) = str_field(item, "providerMessageId") {
        MessageRef::ProviderMessageId(pid.to_string())
    } else {
        return Err(WebhookError::MissingField("messageId"));
    };

    Ok(Normalized::Event(InboundEvent {
        provider: provider.to_string(),
        message,
        event_type,
        provider_event_id,
        occurred_at: timestamp(item)?,
        raw_payload: item.clone(),
    }))
}

fn str_field<'a>(item: &'a Value, field: &str) -> Option<&'a str> {
    item.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// `timestamp` as unix seconds (number or numeric string) or RFC 3339
fn timestamp(item: &Value) -> WebhookResult<Option<DateTime<Utc>>> {
    let invalid = |reason: String| WebhookError::InvalidField {
        field: "timestamp",
        reason,
    };

    let parsed = match item.get("timestamp") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => {
            let secs = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| invalid(n.to_string()))?;
            DateTime::from_timestamp(secs, 0).ok_or_else(|| invalid(n.to_string()))?
        }
        Some(Value::String(s)) => match s.parse::<i64>() {
            Ok(secs) => DateTime::from_timestamp(secs, 0).ok_or_else(|| invalid(s.clone()))?,
            Err(_) => DateTime::parse_from_rfc3339(s)
                .map_err(|e| invalid(e.to_string()))?
                .with_timezone(&Utc),
        },
        Some(other) => return Err(invalid(other.to_string())),
    };

    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(normalized: Normalized) -> InboundEvent {
        match normalized {
            Normalized::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_sendgrid_delivered() {
        let item = json!({
            "event": "delivered",
            "sg_event_id": "evt-1",
            "sg_message_id": "abc123.filter0001.16648.5515E0B88.0",
            "timestamp": 1_700_000_000
        });

        let event = event(normalize("sendgrid", &item).unwrap());
        assert_eq!(event.event_type, EventType::Delivered);
        assert_eq!(event.message, MessageRef::ProviderMessageId("abc123".into()));
        assert_eq!(event.provider_event_id, "evt-1");
        assert_eq!(event.occurred_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(event.raw_payload, item);
    }

    #[test]
    fn test_sendgrid_custom_arg_wins() {
        let id = Uuid::new_v4();
        let item = json!({
            "event": "dropped",
            "sg_event_id": "evt-2",
            "sg_message_id": "abc123.x",
            "message_id": id.to_string()
        });

        let event = event(normalize("sendgrid", &item).unwrap());
        assert_eq!(event.event_type, EventType::Failed);
        assert_eq!(event.message, MessageRef::Id(id));
        assert_eq!(event.occurred_at, None);
    }

    #[test]
    fn test_sendgrid_untracked_event_ignored() {
        let item = json!({"event": "spamreport", "sg_event_id": "e", "sg_message_id": "m"});
        assert_eq!(
            normalize("sendgrid", &item).unwrap(),
            Normalized::Ignored {
                event: "spamreport".into()
            }
        );
    }

    #[test]
    fn test_generic_formats() {
        let item = json!({
            "providerMessageId": "p-1",
            "eventType": "opened",
            "eventId": "e-1",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let event = event(normalize("acme", &item).unwrap());
        assert_eq!(event.provider, "acme");
        assert_eq!(event.event_type, EventType::Opened);
        assert_eq!(event.message, MessageRef::ProviderMessageId("p-1".into()));
        assert_eq!(event.occurred_at.unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_generic_errors() {
        let missing_id = json!({"eventType": "delivered", "eventId": "e"});
        assert!(matches!(
            normalize("acme", &missing_id),
            Err(WebhookError::MissingField("messageId"))
        ));

        let bad_uuid = json!({"eventType": "delivered", "eventId": "e", "messageId": "nope"});
        assert!(matches!(
            normalize("acme", &bad_uuid),
            Err(WebhookError::InvalidField { field: "messageId", .. })
        ));

        let bad_time = json!({
            "eventType": "delivered",
            "eventId": "e",
            "providerMessageId": "p",
            "timestamp": "yesterday"
        });
        assert!(matches!(
            normalize("acme", &bad_time),
            Err(WebhookError::InvalidField { field: "timestamp", .. })
        ));

        assert!(matches!(normalize("acme", &json!("x")), Err(WebhookError::InvalidBody)));
    }

    #[test]
    fn test_split_batch() {
        assert_eq!(split_batch(json!({"a": 1})).unwrap().len(), 1);
        assert_eq!(split_batch(json!([{"a": 1}, {"b": 2}])).unwrap().len(), 2);
        assert!(split_batch(json!(42)).is_err());
    }

    #[test]
    fn test_provider_names() {
        assert!(validate_provider("sendgrid").is_ok());
        assert!(validate_provider("acme_mail-2").is_ok());
        assert!(validate_provider("").is_err());
        assert!(validate_provider("Send Grid").is_err());
    }
}
