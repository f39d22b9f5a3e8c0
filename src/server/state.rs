use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::dispatch::{DispatchPolicy, DispatchQueue, Dispatcher, EmailTransport};
use crate::email::EmailService;
use crate::idempotency::{IdempotencyBackend, IdempotencyGuard, MemoryIdempotencyBackend};
use crate::message::{MemoryMessageStore, MessageStore};
use crate::postgres::PostgresPool;
use crate::redis::RedisPool;
use crate::template::{MemoryTemplateStore, TemplateRenderer, TemplateRepository};
use crate::webhook::DeliveryIngestor;

/// Storage backends the state is assembled from
pub struct Backends {
    pub templates: Arc<dyn TemplateRepository>,
    pub messages: Arc<dyn MessageStore>,
    pub idempotency: Arc<dyn IdempotencyBackend>,
    pub postgres_pool: Option<Arc<PostgresPool>>,
    pub redis_pool: Option<RedisPool>,
}

impl Backends {
    /// Everything in process memory
    pub fn in_memory() -> Self {
        Self {
            templates: Arc::new(MemoryTemplateStore::new()),
            messages: Arc::new(MemoryMessageStore::new()),
            idempotency: Arc::new(MemoryIdempotencyBackend::new()),
            postgres_pool: None,
            redis_pool: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub templates: Arc<dyn TemplateRepository>,
    pub renderer: TemplateRenderer,
    pub messages: Arc<dyn MessageStore>,
    pub queue: Arc<DispatchQueue>,
    pub idempotency: IdempotencyGuard,
    pub emails: Arc<EmailService>,
    pub ingestor: Arc<DeliveryIngestor>,
    pub postgres_pool: Option<Arc<PostgresPool>>,
    pub redis_pool: Option<RedisPool>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, backends: Backends) -> Self {
        let renderer = TemplateRenderer::new(backends.templates.clone());
        let queue = Arc::new(DispatchQueue::new(
            backends.messages.clone(),
            settings.dispatch.queue_capacity,
        ));
        let idempotency =
            IdempotencyGuard::new(backends.idempotency, settings.idempotency.ttl_seconds);
        let emails = Arc::new(EmailService::new(
            idempotency.clone(),
            renderer.clone(),
            queue.clone(),
            settings.provider.default_from.clone(),
        )
        .with_in_flight_wait(Duration::from_millis(settings.idempotency.in_flight_wait_ms)));
        let ingestor = Arc::new(DeliveryIngestor::new(backends.messages.clone()));

        Self {
            settings: Arc::new(settings),
            templates: backends.templates,
            renderer,
            messages: backends.messages,
            queue,
            idempotency,
            emails,
            ingestor,
            postgres_pool: backends.postgres_pool,
            redis_pool: backends.redis_pool,
            start_time: Instant::now(),
        }
    }

    /// State backed entirely by memory, for tests and local runs
    pub fn in_memory(settings: Settings) -> Self {
        Self::new(settings, Backends::in_memory())
    }

    /// Dispatcher sharing this state's queue and renderer
    pub fn dispatcher(&self, transport: Arc<dyn EmailTransport>) -> Dispatcher {
        Dispatcher::new(
            self.queue.clone(),
            self.renderer.clone(),
            transport,
            DispatchPolicy::from(&self.settings.dispatch),
        )
    }

    /// Untouched-for threshold used by health and the reclaimer
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.settings.dispatch.stale_after_seconds)
    }
}
