//! In-memory message store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::store::{decide_ingest, record_transition, IngestOutcome, MessageStore};
use super::types::{
    InboundEvent, Message, MessageRef, ProviderEvent, PurgeStats, StatusCounts, StoreError,
    StoreResult,
};

/// Lock order: `messages` before `events`.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: DashMap<Uuid, Message>,
    events: DashMap<Uuid, Vec<ProviderEvent>>,
    /// `(provider, provider_message_id)` -> message id
    provider_index: DashMap<(String, String), Uuid>,
    /// Events waiting for their provider message id, with arrival time
    parked: DashMap<(String, String), Vec<(DateTime<Utc>, InboundEvent)>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn index(&self, message: &Message) {
        if let (Some(provider), Some(pid)) = (&message.provider, &message.provider_message_id) {
            self.provider_index
                .insert((provider.clone(), pid.clone()), message.message_id);
        }
    }

    fn resolve(&self, provider: &str, reference: &MessageRef) -> Option<Uuid> {
        match reference {
            MessageRef::Id(id) => self.messages.contains_key(id).then_some(*id),
            MessageRef::ProviderMessageId(pid) => self
                .provider_index
                .get(&(provider.to_string(), pid.clone()))
                .map(|id| *id),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, message: &Message) -> StoreResult<()> {
        match self.messages.entry(message.message_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(message.message_id)),
            Entry::Vacant(slot) => {
                slot.insert(message.clone());
                self.index(message);
                Ok(())
            }
        }
    }

    async fn get(&self, message_id: Uuid) -> StoreResult<Message> {
        self.messages
            .get(&message_id)
            .map(|m| m.clone())
            .ok_or(StoreError::NotFound(message_id))
    }

    async fn find_by_provider_message_id(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let id = self
            .provider_index
            .get(&(provider.to_string(), provider_message_id.to_string()))
            .map(|id| *id);

        Ok(id.and_then(|id| self.messages.get(&id).map(|m| m.clone())))
    }

    async fn compare_and_swap(&self, mut message: Message) -> StoreResult<Message> {
        let id = message.message_id;
        {
            let mut stored = self.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if stored.version != message.version {
                return Err(StoreError::Conflict(id));
            }
            message.version += 1;
            *stored = message.clone();
        }

        self.index(&message);
        Ok(message)
    }

    async fn ingest_event(&self, event: InboundEvent) -> StoreResult<IngestOutcome> {
        let Some(message_id) = self.resolve(&event.provider, &event.message) else {
            return Ok(IngestOutcome::UnknownMessage);
        };

        // Holding the message entry serializes this with compare_and_swap
        let Some(mut message) = self.messages.get_mut(&message_id) else {
            return Ok(IngestOutcome::UnknownMessage);
        };
        let mut events = self.events.entry(message_id).or_default();

        let duplicate = events.iter().any(|e| {
            e.provider == event.provider && e.provider_event_id == event.provider_event_id
        });
        if duplicate {
            return Ok(IngestOutcome::Duplicate { message_id });
        }

        let (transition, record) = decide_ingest(&mut message, event);
        events.push(record);

        match transition {
            Some(transition) => {
                message.version += 1;
                record_transition(&transition);
                Ok(IngestOutcome::Applied {
                    message_id,
                    transition,
                })
            }
            None => Ok(IngestOutcome::Recorded { message_id }),
        }
    }

    async fn events(&self, message_id: Uuid) -> StoreResult<Vec<ProviderEvent>> {
        Ok(self
            .events
            .get(&message_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }

    async fn stuck_messages(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>> {
        let mut stuck: Vec<(DateTime<Utc>, Uuid)> = self
            .messages
            .iter()
            .filter(|m| m.is_stuck(stale_before, now))
            .map(|m| (m.next_attempt_at, m.message_id))
            .collect();
        stuck.sort();

        Ok(stuck.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn count_stuck(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.is_stuck(stale_before, now))
            .count() as u64)
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for message in self.messages.iter() {
            counts.add(message.status, 1);
        }
        Ok(counts)
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<PurgeStats> {
        let expired: Vec<Uuid> = self
            .messages
            .iter()
            .filter(|m| m.status.is_terminal() && m.updated_at < cutoff)
            .take(limit)
            .map(|m| m.message_id)
            .collect();

        let mut stats = PurgeStats::default();
        for id in expired {
            let Some((_, message)) = self.messages.remove(&id) else {
                continue;
            };
            stats.messages += 1;

            if let Some((_, events)) = self.events.remove(&id) {
                stats.events += events.len() as u64;
            }
            if let (Some(provider), Some(pid)) = (message.provider, message.provider_message_id) {
                self.provider_index.remove(&(provider, pid));
            }
        }

        Ok(stats)
    }

    async fn park_event(&self, event: &InboundEvent) -> StoreResult<bool> {
        let MessageRef::ProviderMessageId(pid) = &event.message else {
            return Ok(false);
        };

        let mut parked = self
            .parked
            .entry((event.provider.clone(), pid.clone()))
            .or_default();
        if parked
            .iter()
            .any(|(_, e)| e.provider_event_id == event.provider_event_id)
        {
            return Ok(false);
        }

        parked.push((Utc::now(), event.clone()));
        Ok(true)
    }

    async fn take_parked(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> StoreResult<Vec<InboundEvent>> {
        Ok(self
            .parked
            .remove(&(provider.to_string(), provider_message_id.to_string()))
            .map(|(_, events)| events.into_iter().map(|(_, event)| event).collect())
            .unwrap_or_default())
    }

    async fn purge_parked_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64> {
        let mut purged = 0usize;

        self.parked.retain(|_, events| {
            events.retain(|(received_at, _)| {
                let expired = *received_at < cutoff && purged < limit;
                if expired {
                    purged += 1;
                }
                !expired
            });
            !events.is_empty()
        });

        Ok(purged as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::state_machine::tests::queued_message;
    use crate::message::{adopt_parked, mutate_message, EventType, MessageStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn event(reference: MessageRef, event_type: EventType, id: &str) -> InboundEvent {
        InboundEvent {
            provider: "sendgrid".into(),
            message: reference,
            event_type,
            provider_event_id: id.into(),
            occurred_at: None,
            raw_payload: json!({"event": event_type.as_str()}),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryMessageStore::new();
        let message = queued_message();
        store.insert(&message).await.unwrap();

        assert_eq!(store.get(message.message_id).await.unwrap(), message);
        assert!(matches!(
            store.insert(&message).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_and_swap_detects_stale_version() {
        let store = MemoryMessageStore::new();
        let message = queued_message();
        store.insert(&message).await.unwrap();

        let mut first = message.clone();
        first.attempts = 1;
        let saved = store.compare_and_swap(first).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut stale = message.clone();
        stale.attempts = 2;
        assert!(matches!(
            store.compare_and_swap(stale).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_event_suppressed() {
        let store = MemoryMessageStore::new();
        let message = queued_message();
        store.insert(&message).await.unwrap();

        let id = message.message_id;
        let first = store
            .ingest_event(event(MessageRef::Id(id), EventType::Delivered, "ev-1"))
            .await
            .unwrap();
        let second = store
            .ingest_event(event(MessageRef::Id(id), EventType::Delivered, "ev-1"))
            .await
            .unwrap();

        assert!(matches!(first, IngestOutcome::Applied { .. }));
        assert_eq!(second, IngestOutcome::Duplicate { message_id: id });
        assert_eq!(store.events(id).await.unwrap().len(), 1);

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_late_event_recorded_not_applied() {
        let store = MemoryMessageStore::new();
        let mut message = queued_message();
        message.status = MessageStatus::Failed;
        store.insert(&message).await.unwrap();

        let id = message.message_id;
        let outcome = store
            .ingest_event(event(MessageRef::Id(id), EventType::Opened, "ev-open"))
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Recorded { message_id: id });
        let events = store.events(id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].applied);
        assert_eq!(store.get(id).await.unwrap().status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_provider_message_id_lookup() {
        let store = MemoryMessageStore::new();
        let message = queued_message();
        store.insert(&message).await.unwrap();

        let mut sent = message.clone();
        sent.status = MessageStatus::Sent;
        sent.provider = Some("sendgrid".into());
        sent.provider_message_id = Some("sg-123".into());
        store.compare_and_swap(sent).await.unwrap();

        let found = store
            .find_by_provider_message_id("sendgrid", "sg-123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.message_id, message.message_id);

        let outcome = store
            .ingest_event(event(
                MessageRef::ProviderMessageId("sg-123".into()),
                EventType::Bounced,
                "ev-b",
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Applied { .. }));

        let unknown = store
            .ingest_event(event(
                MessageRef::ProviderMessageId("nope".into()),
                EventType::Bounced,
                "ev-c",
            ))
            .await
            .unwrap();
        assert_eq!(unknown, IngestOutcome::UnknownMessage);
    }

    #[tokio::test]
    async fn test_stuck_detection() {
        let store = MemoryMessageStore::new();
        let now = Utc::now();

        let mut stale = queued_message();
        stale.updated_at = now - chrono::Duration::minutes(10);
        store.insert(&stale).await.unwrap();

        let fresh = queued_message();
        store.insert(&fresh).await.unwrap();

        let mut leased = queued_message();
        leased.updated_at = now - chrono::Duration::minutes(10);
        leased.lease_expires_at = Some(now + chrono::Duration::minutes(1));
        store.insert(&leased).await.unwrap();

        let stale_before = now - chrono::Duration::minutes(2);
        assert_eq!(
            store.stuck_messages(stale_before, now, 10).await.unwrap(),
            vec![stale.message_id]
        );
        assert_eq!(store.count_stuck(stale_before, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_only_old_terminal_messages() {
        let store = MemoryMessageStore::new();
        let now = Utc::now();

        let mut old_delivered = queued_message();
        old_delivered.status = MessageStatus::Delivered;
        old_delivered.updated_at = now - chrono::Duration::days(40);
        store.insert(&old_delivered).await.unwrap();
        store
            .ingest_event(event(
                MessageRef::Id(old_delivered.message_id),
                EventType::Opened,
                "ev-1",
            ))
            .await
            .unwrap();

        let mut old_queued = queued_message();
        old_queued.updated_at = now - chrono::Duration::days(40);
        store.insert(&old_queued).await.unwrap();

        let stats = store
            .purge_terminal_before(now - chrono::Duration::days(30), 100)
            .await
            .unwrap();
        assert_eq!(stats, PurgeStats { messages: 1, events: 1 });
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_parked_events_dedupe_and_drain() {
        let store = MemoryMessageStore::new();
        let early = event(
            MessageRef::ProviderMessageId("sg-9".into()),
            EventType::Delivered,
            "ev-1",
        );

        assert!(store.park_event(&early).await.unwrap());
        assert!(!store.park_event(&early).await.unwrap());
        assert!(!store
            .park_event(&event(MessageRef::Id(Uuid::new_v4()), EventType::Opened, "ev-2"))
            .await
            .unwrap());

        assert!(store.take_parked("other", "sg-9").await.unwrap().is_empty());
        assert_eq!(store.take_parked("sendgrid", "sg-9").await.unwrap(), vec![early]);
        assert!(store.take_parked("sendgrid", "sg-9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adopt_parked_applies_early_events() {
        let store = MemoryMessageStore::new();
        let message = queued_message();
        store.insert(&message).await.unwrap();

        for (event_type, id) in [(EventType::Delivered, "ev-d"), (EventType::Opened, "ev-o")] {
            let early = event(MessageRef::ProviderMessageId("sg-7".into()), event_type, id);
            store.park_event(&early).await.unwrap();
        }

        // No provider id recorded yet: nothing to adopt
        assert_eq!(adopt_parked(&store, &message).await.unwrap(), 0);

        let mut sent = message.clone();
        sent.status = MessageStatus::Sent;
        sent.provider = Some("sendgrid".into());
        sent.provider_message_id = Some("sg-7".into());
        let saved = store.compare_and_swap(sent).await.unwrap();

        assert_eq!(adopt_parked(&store, &saved).await.unwrap(), 2);

        let stored = store.get(message.message_id).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(store.events(message.message_id).await.unwrap().len(), 2);
        assert!(store.take_parked("sendgrid", "sg-7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_parked_respects_cutoff() {
        let store = MemoryMessageStore::new();
        let early = event(
            MessageRef::ProviderMessageId("sg-1".into()),
            EventType::Bounced,
            "ev-1",
        );
        store.park_event(&early).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.purge_parked_before(past, 10).await.unwrap(), 0);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(store.purge_parked_before(future, 0).await.unwrap(), 0);
        assert_eq!(store.purge_parked_before(future, 10).await.unwrap(), 1);
        assert!(store.take_parked("sendgrid", "sg-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutate_retries_past_concurrent_webhook() {
        let store = Arc::new(MemoryMessageStore::new());
        let message = queued_message();
        store.insert(&message).await.unwrap();
        let id = message.message_id;

        let mut rounds = 0;
        let webhook_store = store.clone();
        let (saved, ()) = mutate_message(store.as_ref(), id, |m| {
            rounds += 1;
            if rounds == 1 {
                // Simulate a webhook landing between read and write
                let mut concurrent = webhook_store.messages.get_mut(&id).unwrap();
                concurrent.status = MessageStatus::Sent;
                concurrent.version += 1;
            }
            m.attempts += 1;
        })
        .await
        .unwrap();

        assert_eq!(rounds, 2);
        assert_eq!(saved.status, MessageStatus::Sent);
        assert_eq!(saved.attempts, 1);
        assert_eq!(saved.version, 2);
    }
}
