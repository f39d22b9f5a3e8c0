//! Render warning accounting
//!
//! Kept in its own binary so the process-wide counter is not shared
//! with other tests.

use std::sync::Arc;

use serde_json::json;

use ara_email_gateway::config::Settings;
use ara_email_gateway::dispatch::providers::MockTransport;
use ara_email_gateway::dispatch::DispatchOutcome;
use ara_email_gateway::email::SendEmailRequest;
use ara_email_gateway::metrics::RENDER_WARNINGS_TOTAL;
use ara_email_gateway::server::AppState;
use ara_email_gateway::template::{CreateTemplateRequest, LocaleSelector, Template};

#[tokio::test]
async fn test_warnings_counted_once_per_accepted_message() {
    let mut settings = Settings::default();
    settings.dispatch.initial_delay_ms = 0;
    let state = AppState::in_memory(settings);

    let template: CreateTemplateRequest = serde_json::from_value(json!({
        "key": "digest",
        "name": "Digest",
        "baseStructure": {"title": "Hi {{user.name}}", "body": "{{summary}}"}
    }))
    .unwrap();
    state.templates.create(Template::from(template)).await.unwrap();

    let request: SendEmailRequest = serde_json::from_value(json!({
        "to": ["ana@example.com"],
        "subject": "Your digest",
        "template": {"key": "digest"}
    }))
    .unwrap();

    let before = RENDER_WARNINGS_TOTAL.get();
    let accepted = state.emails.send("default", "d-1", request).await.unwrap();
    assert_eq!(RENDER_WARNINGS_TOTAL.get(), before + 2);

    // Dispatch renders the same template again without counting
    let dispatcher = state.dispatcher(Arc::new(MockTransport::scripted(vec![])));
    assert_eq!(
        dispatcher.process_one(accepted.message_id).await.unwrap(),
        DispatchOutcome::Sent
    );
    assert_eq!(RENDER_WARNINGS_TOTAL.get(), before + 2);

    // So does a preview
    let preview = state
        .renderer
        .render_email("digest", &LocaleSelector::UseBase, "Preview", &json!({}))
        .await
        .unwrap();
    assert_eq!(preview.warnings.len(), 2);
    assert_eq!(RENDER_WARNINGS_TOTAL.get(), before + 2);
}
