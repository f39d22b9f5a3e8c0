//! Dispatch workers: claim, render, send, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::message::state_machine::{apply_attempt, try_claim};
use crate::message::{
    adopt_parked, mutate_message, AttemptEffect, AttemptOutcome, Message, MessageStore,
    StoreError, StoreResult,
};
use crate::metrics::{DispatchMetrics, StatusMetrics};
use crate::template::{LocaleSelector, TemplateError, TemplateRenderer};

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::queue::DispatchQueue;
use super::transport::{EmailTransport, OutboundEmail, TransportError};

/// Extra lease time on top of the transport timeout, covering render and store writes
const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// What one `process_one` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not due, leased elsewhere, already past QUEUED, or gone
    Skipped,
    Sent,
    RetryScheduled { delay: Duration },
    Failed,
    /// A webhook moved the message on during the attempt
    Superseded,
}

/// Delivery settings for workers
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub transport_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            transport_timeout: Duration::from_millis(config.transport_timeout_ms),
            backoff: BackoffConfig::from(config),
        }
    }
}

impl DispatchPolicy {
    fn lease(&self) -> Duration {
        self.transport_timeout + LEASE_MARGIN
    }
}

/// Runs single delivery attempts
pub struct Dispatcher {
    queue: Arc<DispatchQueue>,
    renderer: TemplateRenderer,
    transport: Arc<dyn EmailTransport>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<DispatchQueue>,
        renderer: TemplateRenderer,
        transport: Arc<dyn EmailTransport>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            queue,
            renderer,
            transport,
            policy,
        }
    }

    fn store(&self) -> &dyn MessageStore {
        self.queue.store().as_ref()
    }

    /// Claim, render, send and record one attempt for `message_id`.
    #[tracing::instrument(
        name = "dispatch.attempt",
        skip(self),
        fields(provider = %self.transport.name())
    )]
    pub async fn process_one(&self, message_id: Uuid) -> StoreResult<DispatchOutcome> {
        let Some(message) = self.claim(message_id).await? else {
            return Ok(DispatchOutcome::Skipped);
        };

        let attempt = message.attempts + 1;
        let started = Instant::now();
        let outcome = self.attempt(&message).await;
        let latency = started.elapsed().as_secs_f64();

        if let AttemptOutcome::Rejected { error, retryable, .. } = &outcome {
            tracing::warn!(
                message_id = %message_id,
                attempt,
                retryable,
                error = %error,
                "Delivery attempt failed"
            );
        }

        let max_attempts = self.policy.max_attempts;
        let backoff = &self.policy.backoff;
        let (saved, effect) = mutate_message(self.store(), message_id, |current| {
            apply_attempt(
                current,
                outcome.clone(),
                max_attempts,
                |n| backoff.delay_for(n),
                Utc::now(),
            )
        })
        .await?;

        let result = match effect {
            AttemptEffect::Sent(transition) => {
                StatusMetrics::record_transition(transition.to.as_str());
                DispatchMetrics::record_attempt("sent", latency);
                tracing::info!(
                    message_id = %message_id,
                    attempt,
                    provider_message_id = ?saved.provider_message_id,
                    "Message sent"
                );
                DispatchOutcome::Sent
            }
            AttemptEffect::RetryScheduled { at, delay } => {
                DispatchMetrics::record_attempt("retry", latency);
                tracing::info!(
                    message_id = %message_id,
                    attempt,
                    next_attempt_at = %at,
                    delay_ms = delay.as_millis() as u64,
                    "Retry scheduled"
                );
                self.queue.schedule_retry(message_id, delay);
                DispatchOutcome::RetryScheduled { delay }
            }
            AttemptEffect::Failed(transition) => {
                StatusMetrics::record_transition(transition.to.as_str());
                DispatchMetrics::record_attempt("failed", latency);
                tracing::error!(
                    message_id = %message_id,
                    attempts = saved.attempts,
                    last_error = ?saved.last_error,
                    "Message failed permanently"
                );
                DispatchOutcome::Failed
            }
            AttemptEffect::Superseded => {
                DispatchMetrics::record_attempt("superseded", latency);
                tracing::info!(
                    message_id = %message_id,
                    status = %saved.status,
                    "Attempt finished after a provider event settled the message"
                );
                DispatchOutcome::Superseded
            }
        };

        // Events that arrived before the provider id was recorded
        if let Err(e) = adopt_parked(self.store(), &saved).await {
            tracing::warn!(
                message_id = %message_id,
                error = %e,
                "Failed to adopt parked provider events"
            );
        }

        Ok(result)
    }

    async fn claim(&self, message_id: Uuid) -> StoreResult<Option<Message>> {
        let lease = self.policy.lease();
        match mutate_message(self.store(), message_id, |m| try_claim(m, lease, Utc::now())).await {
            Ok((message, true)) => Ok(Some(message)),
            Ok((message, false)) => {
                tracing::debug!(
                    message_id = %message_id,
                    status = %message.status,
                    "Message not claimable"
                );
                Ok(None)
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(message_id = %message_id, "Queued message no longer exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Render and send; every failure becomes a rejected outcome
    async fn attempt(&self, message: &Message) -> AttemptOutcome {
        let provider = self.transport.name().to_string();

        let email = match self.build_email(message).await {
            Ok(email) => email,
            Err(e) => {
                let retryable = matches!(e, TemplateError::Storage(_));
                return AttemptOutcome::Rejected {
                    provider,
                    error: format!("render failed: {}", e),
                    retryable,
                };
            }
        };

        let sent = tokio::time::timeout(self.policy.transport_timeout, self.transport.send(&email))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Retryable(format!(
                    "transport timed out after {}ms",
                    self.policy.transport_timeout.as_millis()
                )))
            });

        match sent {
            Ok(sent) => AttemptOutcome::Accepted {
                provider,
                provider_message_id: sent.provider_message_id,
            },
            Err(e) => AttemptOutcome::Rejected {
                provider,
                retryable: e.is_retryable(),
                error: e.to_string(),
            },
        }
    }

    async fn build_email(&self, message: &Message) -> Result<OutboundEmail, TemplateError> {
        let selector = LocaleSelector::from_request(message.locale.as_deref())?;
        let rendered = self
            .renderer
            .render_email(
                &message.template_key,
                &selector,
                &message.subject,
                &message.variables,
            )
            .await?;

        if !rendered.validation.valid {
            tracing::warn!(
                message_id = %message.message_id,
                template_key = %message.template_key,
                errors = rendered.validation.errors.len(),
                "Variables no longer match the template schema, sending anyway"
            );
        }

        Ok(OutboundEmail {
            message_id: message.message_id,
            from: message.from.clone(),
            to: message.recipients.clone(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
            metadata: message.metadata.clone(),
        })
    }
}

/// Fixed-size pool of dispatch workers
pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<DispatchQueue>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(dispatcher: Arc<Dispatcher>, queue: Arc<DispatchQueue>, workers: usize) -> Self {
        Self {
            dispatcher,
            queue,
            workers: workers.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.workers
    }

    /// Spawn the workers; each stops on the shutdown broadcast
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.workers, "Starting dispatch workers");
        (0..self.workers)
            .map(|worker_id| {
                let dispatcher = Arc::clone(&self.dispatcher);
                let queue = Arc::clone(&self.queue);
                let shutdown = shutdown.subscribe();
                tokio::spawn(run_worker(worker_id, dispatcher, queue, shutdown))
            })
            .collect()
    }
}

async fn run_worker(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<DispatchQueue>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
        initial_delay_ms: 100,
        max_delay_ms: 10_000,
        multiplier: 2.0,
        jitter_factor: 0.1,
    });

    loop {
        let message_id = tokio::select! {
            _ = shutdown.recv() => break,
            next = queue.next() => match next {
                Some(id) => id,
                None => break,
            },
        };

        match dispatcher.process_one(message_id).await {
            Ok(_) => backoff.reset(),
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::error!(
                    worker_id,
                    message_id = %message_id,
                    error = %e,
                    pause_ms = delay.as_millis() as u64,
                    "Dispatch failed, message left for the reclaimer"
                );
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::debug!(worker_id, "Dispatch worker stopped");
}
