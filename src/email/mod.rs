//! Send-request intake: shape checks, idempotent admission and enqueue.

mod models;
mod service;

pub use models::{
    check_idempotency_key, SendEmailRequest, SendEmailResponse, TemplateRef,
    MAX_IDEMPOTENCY_KEY_LEN, MAX_RECIPIENTS,
};
pub use service::{EmailError, EmailResult, EmailService};
