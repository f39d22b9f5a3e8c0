//! Delivery state machine.
//!
//! ```text
//! QUEUED ──attempt accepted / any provider event──▶ SENT
//!   │                                                 │
//!   └──attempts exhausted / permanent rejection──▶ FAILED
//!                                                     │
//!                    SENT ──delivered / bounced / failed──▶ terminal
//! ```
//!
//! Terminal statuses absorb everything. Provider events that arrive while
//! the message is still QUEUED pass through SENT first.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{EventType, Message, MessageStatus};

/// A status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: MessageStatus,
    pub to: MessageStatus,
    /// QUEUED was coerced through SENT on the way to `to`
    pub via_sent: bool,
}

/// Result of one transport attempt, as seen by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted {
        provider: String,
        provider_message_id: String,
    },
    Rejected {
        provider: String,
        error: String,
        retryable: bool,
    },
}

/// What an attempt did to the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEffect {
    Sent(Transition),
    RetryScheduled { at: DateTime<Utc>, delay: Duration },
    Failed(Transition),
    /// A provider event moved the message on while the attempt was in flight
    Superseded,
}

/// Apply a provider event. Returns the transition, or `None` when the
/// status is unchanged (terminal, or an engagement event on SENT).
pub fn apply_event(
    message: &mut Message,
    event: EventType,
    now: DateTime<Utc>,
) -> Option<Transition> {
    let from = message.status;
    if from.is_terminal() {
        return None;
    }

    let target = event.target_status();
    let to = match (from, target) {
        (MessageStatus::Queued, Some(target)) => target,
        (MessageStatus::Queued, None) => MessageStatus::Sent,
        (_, Some(target)) => target,
        (_, None) => return None,
    };

    message.status = to;
    message.updated_at = now;

    Some(Transition {
        from,
        to,
        via_sent: from == MessageStatus::Queued && to != MessageStatus::Sent,
    })
}

/// Record a finished transport attempt.
///
/// `delay_for(attempts)` gives the backoff before the next try.
pub fn apply_attempt(
    message: &mut Message,
    outcome: AttemptOutcome,
    max_attempts: u32,
    delay_for: impl Fn(u32) -> Duration,
    now: DateTime<Utc>,
) -> AttemptEffect {
    message.attempts += 1;
    message.lease_expires_at = None;
    message.updated_at = now;

    match outcome {
        AttemptOutcome::Accepted {
            provider,
            provider_message_id,
        } => {
            if message.provider_message_id.is_none() {
                message.provider = Some(provider);
                message.provider_message_id = Some(provider_message_id);
            }

            if message.status != MessageStatus::Queued {
                return AttemptEffect::Superseded;
            }

            message.status = MessageStatus::Sent;
            AttemptEffect::Sent(Transition {
                from: MessageStatus::Queued,
                to: MessageStatus::Sent,
                via_sent: false,
            })
        }
        AttemptOutcome::Rejected {
            provider,
            error,
            retryable,
        } => {
            message.last_error = Some(error);
            if message.provider.is_none() {
                message.provider = Some(provider);
            }

            if message.status != MessageStatus::Queued {
                return AttemptEffect::Superseded;
            }

            if retryable && message.attempts < max_attempts {
                let delay = delay_for(message.attempts);
                let at = time_after(now, delay);
                message.next_attempt_at = at;
                return AttemptEffect::RetryScheduled { at, delay };
            }

            message.status = MessageStatus::Failed;
            AttemptEffect::Failed(Transition {
                from: MessageStatus::Queued,
                to: MessageStatus::Failed,
                via_sent: false,
            })
        }
    }
}

/// `now + by`, saturating at the end of the representable range
pub fn time_after(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| now.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - by`, saturating at the start of the representable range
pub fn time_before(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| now.checked_sub_signed(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Take a worker lease on a due, unleased QUEUED message.
pub fn try_claim(message: &mut Message, lease: Duration, now: DateTime<Utc>) -> bool {
    if message.status != MessageStatus::Queued
        || message.next_attempt_at > now
        || message.is_leased(now)
    {
        return false;
    }

    message.lease_expires_at = Some(time_after(now, lease));
    message.updated_at = now;
    true
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    pub(crate) fn queued_message() -> Message {
        let now = Utc::now();
        Message {
            message_id: Uuid::new_v4(),
            caller_id: "default".into(),
            idempotency_key: "k".into(),
            template_key: "welcome".into(),
            locale: None,
            recipients: vec!["ana@example.com".into()],
            from: "no-reply@example.com".into(),
            subject: "Hi".into(),
            variables: json!({}),
            metadata: json!({}),
            status: MessageStatus::Queued,
            attempts: 0,
            provider: None,
            provider_message_id: None,
            last_error: None,
            next_attempt_at: now - chrono::Duration::seconds(1),
            lease_expires_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn no_delay(_: u32) -> Duration {
        Duration::from_millis(0)
    }

    fn rejected(retryable: bool) -> AttemptOutcome {
        AttemptOutcome::Rejected {
            provider: "log".into(),
            error: "503 upstream".into(),
            retryable,
        }
    }

    #[test]
    fn test_delivered_while_queued_coerces_through_sent() {
        let mut message = queued_message();
        let transition = apply_event(&mut message, EventType::Delivered, Utc::now()).unwrap();

        assert_eq!(transition.from, MessageStatus::Queued);
        assert_eq!(transition.to, MessageStatus::Delivered);
        assert!(transition.via_sent);
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[test]
    fn test_engagement_while_queued_moves_to_sent() {
        let mut message = queued_message();
        let transition = apply_event(&mut message, EventType::Opened, Utc::now()).unwrap();
        assert_eq!(transition.to, MessageStatus::Sent);
        assert!(!transition.via_sent);
    }

    #[test]
    fn test_engagement_on_sent_is_not_a_transition() {
        let mut message = queued_message();
        message.status = MessageStatus::Sent;
        assert_eq!(apply_event(&mut message, EventType::Clicked, Utc::now()), None);
        assert_eq!(apply_event(&mut message, EventType::Deferred, Utc::now()), None);
        assert_eq!(message.status, MessageStatus::Sent);
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [
            MessageStatus::Delivered,
            MessageStatus::Bounced,
            MessageStatus::Failed,
        ] {
            let mut message = queued_message();
            message.status = terminal;
            for event in [EventType::Opened, EventType::Delivered, EventType::Bounced] {
                assert_eq!(apply_event(&mut message, event, Utc::now()), None);
            }
            assert_eq!(message.status, terminal);
        }
    }

    #[test]
    fn test_sent_to_bounced() {
        let mut message = queued_message();
        message.status = MessageStatus::Sent;
        let transition = apply_event(&mut message, EventType::Bounced, Utc::now()).unwrap();
        assert_eq!(transition.to, MessageStatus::Bounced);
    }

    #[test]
    fn test_accepted_attempt_sends() {
        let mut message = queued_message();
        message.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(30));

        let effect = apply_attempt(
            &mut message,
            AttemptOutcome::Accepted {
                provider: "log".into(),
                provider_message_id: "p-1".into(),
            },
            5,
            no_delay,
            Utc::now(),
        );

        assert!(matches!(effect, AttemptEffect::Sent(_)));
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.attempts, 1);
        assert_eq!(message.provider_message_id.as_deref(), Some("p-1"));
        assert!(message.lease_expires_at.is_none());
    }

    #[test]
    fn test_retry_until_exhausted() {
        let mut message = queued_message();
        let now = Utc::now();

        for attempt in 1..3 {
            let effect = apply_attempt(
                &mut message,
                rejected(true),
                3,
                |n| Duration::from_secs(n as u64),
                now,
            );
            match effect {
                AttemptEffect::RetryScheduled { at, delay } => {
                    assert_eq!(delay, Duration::from_secs(attempt));
                    assert_eq!(at, message.next_attempt_at);
                }
                other => panic!("expected retry, got {:?}", other),
            }
            assert_eq!(message.status, MessageStatus::Queued);
        }

        let effect = apply_attempt(&mut message, rejected(true), 3, no_delay, now);
        assert!(matches!(effect, AttemptEffect::Failed(_)));
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.attempts, 3);
        assert_eq!(message.last_error.as_deref(), Some("503 upstream"));
    }

    #[test]
    fn test_permanent_rejection_fails_immediately() {
        let mut message = queued_message();
        let effect = apply_attempt(&mut message, rejected(false), 5, no_delay, Utc::now());
        assert!(matches!(effect, AttemptEffect::Failed(_)));
        assert_eq!(message.attempts, 1);
    }

    #[test]
    fn test_attempt_after_webhook_is_superseded() {
        let mut message = queued_message();
        apply_event(&mut message, EventType::Delivered, Utc::now());

        let effect = apply_attempt(
            &mut message,
            AttemptOutcome::Accepted {
                provider: "log".into(),
                provider_message_id: "p-9".into(),
            },
            5,
            no_delay,
            Utc::now(),
        );
        assert_eq!(effect, AttemptEffect::Superseded);
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.provider_message_id.as_deref(), Some("p-9"));
    }

    #[test]
    fn test_claim_rules() {
        let now = Utc::now();
        let lease = Duration::from_secs(30);

        let mut message = queued_message();
        assert!(try_claim(&mut message, lease, now));
        // Second claim blocked by the live lease
        assert!(!try_claim(&mut message, lease, now));
        // Lease expired
        assert!(try_claim(&mut message, lease, now + chrono::Duration::seconds(31)));

        let mut future = queued_message();
        future.next_attempt_at = now + chrono::Duration::seconds(60);
        assert!(!try_claim(&mut future, lease, now));

        let mut sent = queued_message();
        sent.status = MessageStatus::Sent;
        assert!(!try_claim(&mut sent, lease, now));
    }
    #[test]
    fn test_time_offsets_saturate() {
        let now = Utc::now();
        let minute = Duration::from_secs(60);
        assert_eq!(time_after(now, minute), now + chrono::Duration::seconds(60));
        assert_eq!(time_before(now, minute), now - chrono::Duration::seconds(60));

        assert_eq!(time_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(time_before(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);

        let mut message = queued_message();
        assert!(try_claim(&mut message, Duration::from_secs(u64::MAX), now));
        assert_eq!(message.lease_expires_at, Some(DateTime::<Utc>::MAX_UTC));
    }
}
