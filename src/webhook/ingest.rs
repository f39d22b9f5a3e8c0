//! Webhook batch ingestion

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::message::{adopt_parked, InboundEvent, IngestOutcome, MessageRef, MessageStore};
use crate::metrics::WebhookMetrics;

use super::normalize::{normalize, split_batch, validate_provider, Normalized, WebhookResult};

/// Per-batch tally returned to the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub received: usize,
    /// Changed a message status
    pub applied: usize,
    /// Stored for audit without a status change
    pub recorded: usize,
    pub duplicates: usize,
    /// Held until the send records its provider message id
    pub parked: usize,
    /// No message matches the reference
    pub unmatched: usize,
    /// Event kind not tracked
    pub ignored: usize,
    /// Could not be mapped
    pub rejected: usize,
}

pub struct DeliveryIngestor {
    store: Arc<dyn MessageStore>,
}

impl DeliveryIngestor {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Normalize and apply every event in a webhook body.
    ///
    /// Events addressed by a provider message id nobody has recorded yet
    /// are parked and applied once the worker stores that id. Mapping
    /// failures are counted per item. A store failure aborts the
    /// batch so the provider redelivers it; already-applied items are
    /// recognised as duplicates on the next delivery.
    #[tracing::instrument(name = "webhook.ingest", skip(self, body))]
    pub async fn ingest(&self, provider: &str, body: Value) -> WebhookResult<IngestSummary> {
        validate_provider(provider)?;
        let items = split_batch(body)?;

        let mut summary = IngestSummary {
            received: items.len(),
            ..Default::default()
        };

        for item in &items {
            let event = match normalize(provider, item) {
                Ok(Normalized::Event(event)) => event,
                Ok(Normalized::Ignored { event }) => {
                    tracing::debug!(provider, event = %event, "Ignoring untracked webhook event");
                    summary.ignored += 1;
                    WebhookMetrics::record(provider, "ignored");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(provider, error = %e, "Rejected webhook item");
                    summary.rejected += 1;
                    WebhookMetrics::record(provider, "rejected");
                    continue;
                }
            };

            let reference = event.message.to_string();
            let event_type = event.event_type;
            let provider_event_id = event.provider_event_id.clone();
            let parkable = matches!(event.message, MessageRef::ProviderMessageId(_))
                .then(|| event.clone());

            let result = match self.store.ingest_event(event).await? {
                IngestOutcome::Applied {
                    message_id,
                    transition,
                } => {
                    tracing::info!(
                        provider,
                        message_id = %message_id,
                        event_type = %event_type,
                        from = %transition.from,
                        to = %transition.to,
                        "Provider event applied"
                    );
                    summary.applied += 1;
                    "applied"
                }
                IngestOutcome::Recorded { message_id } => {
                    tracing::debug!(
                        provider,
                        message_id = %message_id,
                        event_type = %event_type,
                        "Provider event recorded without status change"
                    );
                    summary.recorded += 1;
                    "recorded"
                }
                IngestOutcome::Duplicate { message_id } => {
                    tracing::debug!(
                        provider,
                        message_id = %message_id,
                        provider_event_id = %provider_event_id,
                        "Duplicate provider event"
                    );
                    summary.duplicates += 1;
                    "duplicate"
                }
                IngestOutcome::UnknownMessage => match parkable {
                    Some(event) => {
                        if self.park(event).await? {
                            tracing::info!(
                                provider,
                                reference = %reference,
                                event_type = %event_type,
                                "Provider event parked until its message is sent"
                            );
                            summary.parked += 1;
                            "parked"
                        } else {
                            summary.duplicates += 1;
                            "duplicate"
                        }
                    }
                    None => {
                        tracing::warn!(
                            provider,
                            reference = %reference,
                            event_type = %event_type,
                            "Provider event for unknown message"
                        );
                        summary.unmatched += 1;
                        "unmatched"
                    }
                },
            };
            WebhookMetrics::record(provider, result);
        }

        Ok(summary)
    }

    /// Park `event`, then adopt it straight away if the provider id was
    /// recorded while it was being parked. Returns `false` for an event
    /// that was already parked.
    async fn park(&self, event: InboundEvent) -> WebhookResult<bool> {
        let parked = self.store.park_event(&event).await?;

        if let MessageRef::ProviderMessageId(pid) = &event.message {
            if let Some(message) = self
                .store
                .find_by_provider_message_id(&event.provider, pid)
                .await?
            {
                adopt_parked(self.store.as_ref(), &message).await?;
            }
        }

        Ok(parked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::state_machine::tests::queued_message;
    use crate::message::{MemoryMessageStore, MessageStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_batch_tally() {
        let store = Arc::new(MemoryMessageStore::new());
        let message = queued_message();
        store.insert(&message).await.unwrap();
        let id = message.message_id.to_string();

        let ingestor = DeliveryIngestor::new(store.clone());
        let body = json!([
            {"messageId": id, "eventType": "delivered", "eventId": "e-1"},
            {"messageId": id, "eventType": "delivered", "eventId": "e-1"},
            {"messageId": id, "eventType": "opened", "eventId": "e-2"},
            {"providerMessageId": "nobody", "eventType": "delivered", "eventId": "e-3"},
            {"messageId": id, "eventType": "unsubscribed", "eventId": "e-4"},
            {"eventType": "delivered"}
        ]);

        let summary = ingestor.ingest("acme", body).await.unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                received: 6,
                applied: 1,
                recorded: 1,
                duplicates: 1,
                parked: 1,
                unmatched: 0,
                ignored: 1,
                rejected: 1,
            }
        );

        assert_eq!(store.get(message.message_id).await.unwrap().status, MessageStatus::Delivered);
        assert_eq!(store.events(message.message_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_early_provider_event_is_parked_then_adopted() {
        let store = Arc::new(MemoryMessageStore::new());
        let message = queued_message();
        store.insert(&message).await.unwrap();

        let ingestor = DeliveryIngestor::new(store.clone());
        let body = json!([
            {"providerMessageId": "acme-42", "eventType": "delivered", "eventId": "e-1"},
            {"providerMessageId": "acme-42", "eventType": "delivered", "eventId": "e-1"},
            {"messageId": uuid::Uuid::new_v4().to_string(), "eventType": "opened", "eventId": "e-2"}
        ]);
        let summary = ingestor.ingest("acme", body).await.unwrap();
        assert_eq!(summary.parked, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.unmatched, 1);

        // The worker records the provider id and adopts what was parked
        let mut sent = message.clone();
        sent.status = MessageStatus::Sent;
        sent.provider = Some("acme".into());
        sent.provider_message_id = Some("acme-42".into());
        let saved = store.compare_and_swap(sent).await.unwrap();
        assert_eq!(adopt_parked(store.as_ref(), &saved).await.unwrap(), 1);

        assert_eq!(store.get(message.message_id).await.unwrap().status, MessageStatus::Delivered);

        // Redelivery of the same event is now a plain duplicate
        let again = json!({"providerMessageId": "acme-42", "eventType": "delivered", "eventId": "e-1"});
        let summary = ingestor.ingest("acme", again).await.unwrap();
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.parked, 0);
    }

    #[tokio::test]
    async fn test_event_parked_after_send_is_adopted_immediately() {
        let store = Arc::new(MemoryMessageStore::new());
        let mut message = queued_message();
        store.insert(&message).await.unwrap();

        message.status = MessageStatus::Sent;
        message.provider = Some("acme".into());
        message.provider_message_id = Some("acme-7".into());
        store.compare_and_swap(message.clone()).await.unwrap();

        let event = InboundEvent {
            provider: "acme".into(),
            message: MessageRef::ProviderMessageId("acme-7".into()),
            event_type: crate::message::EventType::Bounced,
            provider_event_id: "e-9".into(),
            occurred_at: None,
            raw_payload: json!({}),
        };
        let ingestor = DeliveryIngestor::new(store.clone());
        assert!(ingestor.park(event).await.unwrap());

        assert_eq!(store.get(message.message_id).await.unwrap().status, MessageStatus::Bounced);
        assert!(store.take_parked("acme", "acme-7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_provider_and_body() {
        let ingestor = DeliveryIngestor::new(Arc::new(MemoryMessageStore::new()));
        assert!(ingestor.ingest("Bad Provider", json!({})).await.is_err());
        assert!(ingestor.ingest("acme", json!("text")).await.is_err());
    }
}
