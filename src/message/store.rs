//! Message store trait and the optimistic-concurrency mutation helper.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::metrics::{DispatchMetrics, StatusMetrics};

use super::state_machine::{apply_event, Transition};
use super::types::{
    InboundEvent, Message, MessageRef, MessageStatus, ProviderEvent, PurgeStats, StatusCounts,
    StoreError, StoreResult,
};

/// Attempts before [`mutate_message`] gives up on a contended message
const MAX_CAS_ROUNDS: usize = 8;

/// What webhook ingestion did with one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Recorded and changed the message status
    Applied {
        message_id: Uuid,
        transition: Transition,
    },
    /// Recorded for audit, status unchanged
    Recorded { message_id: Uuid },
    /// Same provider event id seen before; nothing written
    Duplicate { message_id: Uuid },
    /// No message matches the event reference
    UnknownMessage,
}

/// Persistent record of messages and their provider events
#[async_trait]
pub trait MessageStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn insert(&self, message: &Message) -> StoreResult<()>;

    async fn get(&self, message_id: Uuid) -> StoreResult<Message>;

    async fn find_by_provider_message_id(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> StoreResult<Option<Message>>;

    /// Write `message` if the stored version still equals `message.version`.
    ///
    /// Returns the stored message with its bumped version, or
    /// `StoreError::Conflict` when another writer got there first.
    async fn compare_and_swap(&self, message: Message) -> StoreResult<Message>;

    /// Deduplicate, record and apply a provider event as one atomic step.
    async fn ingest_event(&self, event: InboundEvent) -> StoreResult<IngestOutcome>;

    /// Events of a message in arrival order
    async fn events(&self, message_id: Uuid) -> StoreResult<Vec<ProviderEvent>>;

    /// Ids of stuck messages (see [`Message::is_stuck`]), oldest due first
    async fn stuck_messages(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>>;

    async fn count_stuck(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>)
        -> StoreResult<u64>;

    async fn status_counts(&self) -> StoreResult<StatusCounts>;

    /// Delete up to `limit` terminal messages last updated before `cutoff`,
    /// together with their events.
    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<PurgeStats>;

    /// Hold an event whose provider message id is not known yet.
    ///
    /// Returns `false` when the same provider event is already parked.
    async fn park_event(&self, event: &InboundEvent) -> StoreResult<bool>;

    /// Remove and return the events parked for a provider message id,
    /// in arrival order.
    async fn take_parked(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> StoreResult<Vec<InboundEvent>>;

    /// Drop up to `limit` parked events received before `cutoff`
    async fn purge_parked_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64>;
}

/// Read, change and compare-and-swap a message, retrying on conflicts.
///
/// `change` runs once per round against a fresh copy. When it leaves the
/// message unchanged nothing is written.
pub async fn mutate_message<F, T>(
    store: &dyn MessageStore,
    message_id: Uuid,
    mut change: F,
) -> StoreResult<(Message, T)>
where
    F: FnMut(&mut Message) -> T + Send,
    T: Send,
{
    for _ in 0..MAX_CAS_ROUNDS {
        let current = store.get(message_id).await?;
        let mut next = current.clone();
        let output = change(&mut next);

        if next == current {
            return Ok((current, output));
        }

        match store.compare_and_swap(next).await {
            Ok(saved) => return Ok((saved, output)),
            Err(StoreError::Conflict(_)) => {
                DispatchMetrics::record_conflict();
                tracing::debug!(message_id = %message_id, "Version conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::ConflictRetriesExhausted(message_id))
}

/// Apply the events parked under the provider message id of `message`.
///
/// Returns how many were recorded. Events that could not be ingested are
/// parked again so a later call picks them up.
pub async fn adopt_parked(store: &dyn MessageStore, message: &Message) -> StoreResult<usize> {
    let (Some(provider), Some(provider_message_id)) =
        (&message.provider, &message.provider_message_id)
    else {
        return Ok(0);
    };

    let parked = store.take_parked(provider, provider_message_id).await?;
    if parked.is_empty() {
        return Ok(0);
    }

    let total = parked.len();
    let mut recorded = 0;
    let mut pending = parked.into_iter();

    while let Some(mut event) = pending.next() {
        let original = event.clone();
        event.message = MessageRef::Id(message.message_id);

        match store.ingest_event(event).await {
            Ok(IngestOutcome::Applied { .. } | IngestOutcome::Recorded { .. }) => recorded += 1,
            Ok(IngestOutcome::Duplicate { .. } | IngestOutcome::UnknownMessage) => {}
            Err(e) => {
                for event in std::iter::once(original).chain(pending) {
                    store.park_event(&event).await?;
                }
                return Err(e);
            }
        }
    }

    tracing::info!(
        message_id = %message.message_id,
        provider = %provider,
        parked = total,
        recorded = recorded,
        "Adopted parked provider events"
    );

    Ok(recorded)
}

/// Shared ingest decision: run the state machine on `message` and build
/// the audit record.
pub(crate) fn decide_ingest(
    message: &mut Message,
    event: InboundEvent,
) -> (Option<Transition>, ProviderEvent) {
    let transition = apply_event(message, event.event_type, Utc::now());
    let record = event.into_record(message.message_id, transition.is_some());
    (transition, record)
}

/// Count a transition in metrics, including the implicit SENT step
pub(crate) fn record_transition(transition: &Transition) {
    if transition.via_sent {
        StatusMetrics::record_transition(MessageStatus::Sent.as_str());
    }
    StatusMetrics::record_transition(transition.to.as_str());
}
