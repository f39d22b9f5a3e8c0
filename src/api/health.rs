//! Health check and statistics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;

use crate::error::AppError;
use crate::message::state_machine::time_before;
use crate::message::StatusCounts;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub storage: StorageHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub dispatch: DispatchHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct StorageHealthResponse {
    pub templates: String,
    pub messages: String,
    pub idempotency: String,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub connected: bool,
    pub pool_size: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct DispatchHealthResponse {
    pub workers: usize,
    pub queue_depth: usize,
    /// QUEUED messages nobody has touched past the staleness threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuck_messages: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub messages: StatusCounts,
    pub total: u64,
}

/// GET /health - 200 when every dependency answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let mut healthy = true;

    let postgres = match &state.postgres_pool {
        Some(pool) => {
            let connected = pool.ping().await;
            healthy &= connected;
            let inner_pool = pool.pool();
            Some(PostgresHealthResponse {
                connected,
                pool_size: inner_pool.size(),
                idle_connections: inner_pool.num_idle() as u32,
            })
        }
        None => None,
    };

    let redis = match &state.redis_pool {
        Some(pool) => {
            let connected = pool.ping().await;
            healthy &= connected;
            Some(RedisHealthResponse { connected })
        }
        None => None,
    };

    let now = Utc::now();
    let stale_before = time_before(now, state.stale_after());
    let stuck_messages = match state.messages.count_stuck(stale_before, now).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count stuck messages");
            healthy = false;
            None
        }
    };

    let status = if healthy { "healthy" } else { "degraded" };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        storage: StorageHealthResponse {
            templates: state.templates.backend_name().to_string(),
            messages: state.messages.backend_name().to_string(),
            idempotency: state.idempotency.backend_name().to_string(),
        },
        postgres,
        redis,
        dispatch: DispatchHealthResponse {
            workers: state.settings.dispatch.workers,
            queue_depth: state.queue.depth(),
            stuck_messages,
        },
    };

    (code, Json(response))
}

/// GET /stats - Message counts by status
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let messages = state.messages.status_counts().await?;
    Ok(Json(StatsResponse {
        total: messages.total(),
        messages,
    }))
}
