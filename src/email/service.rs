//! Accept path for send requests: admit, render-check, persist, enqueue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dispatch::DispatchQueue;
use crate::idempotency::{fingerprint, Admission, IdempotencyError, IdempotencyGuard};
use crate::message::{Message, MessageStatus, StoreError};
use crate::metrics::{AcceptMetrics, RenderMetrics};
use crate::template::{FieldError, LocaleSelector, TemplateError, TemplateRenderer};

use super::models::{check_idempotency_key, SendEmailRequest, SendEmailResponse};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Variables do not match the template schema")]
    SchemaValidation(Vec<FieldError>),

    #[error("A request with this idempotency key is still being processed ({0})")]
    InFlight(Uuid),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EmailError {
    /// Label for the rejected-sends metric
    fn reason(&self) -> &'static str {
        match self {
            EmailError::InvalidRequest(_) => "invalid_request",
            EmailError::SchemaValidation(_) => "schema",
            EmailError::InFlight(_) => "in_flight",
            EmailError::Template(TemplateError::NotFound(_)) => "template_not_found",
            EmailError::Template(TemplateError::Expression { .. }) => "expression",
            EmailError::Template(TemplateError::InvalidLocale(_)) => "invalid_request",
            EmailError::Template(_) => "template",
            EmailError::Idempotency(_) | EmailError::Store(_) => "storage",
        }
    }
}

pub type EmailResult<T> = Result<T, EmailError>;

const DEFAULT_IN_FLIGHT_WAIT: Duration = Duration::from_secs(5);
const IN_FLIGHT_POLL: Duration = Duration::from_millis(20);

pub struct EmailService {
    guard: IdempotencyGuard,
    renderer: TemplateRenderer,
    queue: Arc<DispatchQueue>,
    default_from: String,
    in_flight_wait: Duration,
}

impl EmailService {
    pub fn new(
        guard: IdempotencyGuard,
        renderer: TemplateRenderer,
        queue: Arc<DispatchQueue>,
        default_from: impl Into<String>,
    ) -> Self {
        Self {
            guard,
            renderer,
            queue,
            default_from: default_from.into(),
            in_flight_wait: DEFAULT_IN_FLIGHT_WAIT,
        }
    }

    /// Bound on how long a duplicate waits for the original request's message
    pub fn with_in_flight_wait(mut self, wait: Duration) -> Self {
        self.in_flight_wait = wait;
        self
    }

    /// Accept a send request. Returns as soon as the message is durable
    /// and queued; delivery continues in the workers.
    #[tracing::instrument(
        name = "email.accept",
        skip(self, request),
        fields(template_key = %request.template.key, message_id = tracing::field::Empty)
    )]
    pub async fn send(
        &self,
        caller_id: &str,
        idempotency_key: &str,
        request: SendEmailRequest,
    ) -> EmailResult<SendEmailResponse> {
        let result = self.accept(caller_id, idempotency_key, request).await;
        if let Ok(response) = &result {
            tracing::Span::current()
                .record("message_id", tracing::field::display(response.message_id));
        }
        match &result {
            Ok(response) if response.idempotent_replay => {}
            Ok(_) => AcceptMetrics::record_accepted(),
            Err(e) => AcceptMetrics::record_rejected(e.reason()),
        }
        result
    }

    async fn accept(
        &self,
        caller_id: &str,
        idempotency_key: &str,
        request: SendEmailRequest,
    ) -> EmailResult<SendEmailResponse> {
        check_idempotency_key(idempotency_key).map_err(EmailError::InvalidRequest)?;
        request.check().map_err(EmailError::InvalidRequest)?;
        let selector = LocaleSelector::from_request(request.template.locale.as_deref())?;

        let request_fingerprint = fingerprint(&request);
        let deadline = Instant::now() + self.in_flight_wait;

        // A replay is only answered once its message is durable. If the
        // original request fails and releases the key, this one re-admits.
        let message_id = loop {
            match self
                .guard
                .admit(caller_id, idempotency_key, &request_fingerprint)
                .await?
            {
                Admission::Accepted { message_id } => break message_id,
                Admission::Replayed {
                    message_id,
                    fingerprint_matches,
                } => {
                    if let Some(response) = self.replay(message_id).await? {
                        AcceptMetrics::record_replayed(fingerprint_matches);
                        return Ok(response);
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            caller_id = %caller_id,
                            idempotency_key = %idempotency_key,
                            message_id = %message_id,
                            "Original request still in flight, giving up on replay"
                        );
                        return Err(EmailError::InFlight(message_id));
                    }
                    tokio::time::sleep(IN_FLIGHT_POLL).await;
                }
            }
        };

        match self.create(caller_id, idempotency_key, message_id, &selector, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // Nothing was persisted; let the caller retry with the same key
                self.guard.release(caller_id, idempotency_key, message_id).await;
                Err(e)
            }
        }
    }

    /// Replay answer for `message_id`, or `None` while its row does not exist yet
    async fn replay(&self, message_id: Uuid) -> EmailResult<Option<SendEmailResponse>> {
        let status = match self.queue.store().get(message_id).await {
            Ok(message) => message.status,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(message_id = %message_id, status = %status, "Idempotent replay");

        Ok(Some(SendEmailResponse {
            message_id,
            status,
            idempotent_replay: true,
        }))
    }

    async fn create(
        &self,
        caller_id: &str,
        idempotency_key: &str,
        message_id: Uuid,
        selector: &LocaleSelector,
        request: SendEmailRequest,
    ) -> EmailResult<SendEmailResponse> {
        // Full render up front so unknown templates, bad expressions and
        // schema mismatches are reported to the caller, not the worker
        let rendered = self
            .renderer
            .render_email(
                &request.template.key,
                selector,
                &request.subject,
                &request.variables,
            )
            .await?;

        if !rendered.validation.valid {
            return Err(EmailError::SchemaValidation(rendered.validation.errors));
        }

        let now = Utc::now();
        let message = Message {
            message_id,
            caller_id: caller_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            template_key: request.template.key,
            locale: selector.locale().map(String::from),
            recipients: request.to,
            from: request.from.unwrap_or_else(|| self.default_from.clone()),
            subject: request.subject,
            variables: request.variables,
            metadata: request.metadata,
            status: MessageStatus::Queued,
            attempts: 0,
            provider: None,
            provider_message_id: None,
            last_error: None,
            next_attempt_at: now,
            lease_expires_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.queue.enqueue(&message).await?;

        // Counted once per accepted message; dispatch re-renders silently
        RenderMetrics::record_warnings(rendered.warnings.len());
        for warning in &rendered.warnings {
            tracing::warn!(
                message_id = %message_id,
                template_key = %message.template_key,
                location = %warning.location,
                path = %warning.path,
                "Unresolved variable without fallback rendered as empty"
            );
        }

        tracing::info!(
            message_id = %message_id,
            caller_id = %caller_id,
            recipients = message.recipients.len(),
            locale = ?message.locale,
            warnings = rendered.warnings.len(),
            "Email accepted"
        );

        Ok(SendEmailResponse {
            message_id,
            status: MessageStatus::Queued,
            idempotent_replay: false,
        })
    }
}
