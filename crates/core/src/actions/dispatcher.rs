//! Explicit action registry: a map from action kind to handler, owned by the
//! dispatcher instance. No module-level singleton; the server wires one
//! dispatcher at bootstrap and hands it to the rule engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::actions::handlers::{
    ActionHandler, AddLeadActivityHandler, ApplyLabelHandler, ArchiveEmailHandler,
    CreateTaskHandler, CrmClient, GenerateAiReplyHandler, Labeler, Mailer, Notifier,
    ReplyGenerator, ScheduleFollowUpHandler, SendEmailHandler, SendNotificationHandler,
    TriggerWebhookHandler, UpdateLeadStageHandler, WebhookCaller,
};
use crate::domain::event::TriggerEvent;
use crate::domain::rule::ActionKind;

/// Outcome of dispatching one action. Handler errors are converted into
/// `Failed` here; they never propagate and never abort sibling evaluations.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    Success { details: Value },
    Failed { reason: String },
}

/// External collaborators the default handler set delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub mailer: Arc<dyn Mailer>,
    pub crm: Arc<dyn CrmClient>,
    pub labeler: Arc<dyn Labeler>,
    pub notifier: Arc<dyn Notifier>,
    pub webhooks: Arc<dyn WebhookCaller>,
    pub replies: Arc<dyn ReplyGenerator>,
}

#[derive(Default)]
pub struct ActionDispatcher {
    handlers: HashMap<ActionKind, Box<dyn ActionHandler>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one handler per `ActionKind`, so adding a kind without
    /// wiring a handler shows up immediately in `unregistered_kinds`.
    pub fn with_default_handlers(collaborators: Collaborators) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(SendEmailHandler::new(collaborators.mailer.clone())));
        dispatcher.register(Box::new(UpdateLeadStageHandler::new(collaborators.crm.clone())));
        dispatcher.register(Box::new(AddLeadActivityHandler::new(collaborators.crm.clone())));
        dispatcher.register(Box::new(ApplyLabelHandler::new(collaborators.labeler.clone())));
        dispatcher.register(Box::new(ArchiveEmailHandler::new(collaborators.labeler)));
        dispatcher.register(Box::new(CreateTaskHandler::new(collaborators.crm.clone())));
        dispatcher.register(Box::new(SendNotificationHandler::new(collaborators.notifier)));
        dispatcher.register(Box::new(ScheduleFollowUpHandler::new(collaborators.crm)));
        dispatcher.register(Box::new(TriggerWebhookHandler::new(collaborators.webhooks)));
        dispatcher.register(Box::new(GenerateAiReplyHandler::new(
            collaborators.replies,
            collaborators.mailer,
        )));
        dispatcher
    }

    pub fn register(&mut self, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn unregistered_kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    pub async fn dispatch(
        &self,
        kind: ActionKind,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&kind) else {
            warn!(
                event_name = "dispatch.handler_missing",
                action_kind = kind.as_str(),
                owner_id = %event.owner_id.0,
                "no handler registered for action kind"
            );
            return DispatchOutcome::Failed {
                reason: format!("no handler registered for action `{}`", kind.as_str()),
            };
        };

        match handler.execute(params, event).await {
            Ok(outcome) => DispatchOutcome::Success { details: outcome.details },
            Err(error) => DispatchOutcome::Failed { reason: error.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::{json, Map, Value};

    use super::{ActionDispatcher, Collaborators, DispatchOutcome};
    use crate::actions::testing::{
        FailingMailer, RecordingCollaborators, StaticReplyGenerator,
    };
    use crate::domain::event::TriggerEvent;
    use crate::domain::routing::RoutingErrorKind;
    use crate::domain::rule::{ActionKind, OwnerId, TriggerKind};

    fn email_event() -> TriggerEvent {
        let payload: Map<String, Value> = [
            ("sender_email".to_string(), json!("customer@example.com")),
            ("subject".to_string(), json!("Pricing question")),
            ("body".to_string(), json!("How much is the pro plan?")),
            ("message_id".to_string(), json!("msg-100")),
        ]
        .into_iter()
        .collect();
        TriggerEvent::new(
            TriggerKind::EmailReceived,
            OwnerId("owner-1".to_string()),
            payload,
            Utc::now(),
        )
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn default_registry_covers_every_action_kind() {
        let recording = RecordingCollaborators::new();
        let dispatcher = ActionDispatcher::with_default_handlers(recording.collaborators());
        assert!(dispatcher.unregistered_kinds().is_empty());
    }

    #[tokio::test]
    async fn unregistered_kind_fails_without_panicking() {
        let dispatcher = ActionDispatcher::new();
        let outcome =
            dispatcher.dispatch(ActionKind::SendEmail, &Map::new(), &email_event()).await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { ref reason } if reason.contains("send_email")
        ));
    }

    #[tokio::test]
    async fn send_email_delegates_to_the_mailer() {
        let recording = RecordingCollaborators::new();
        let dispatcher = ActionDispatcher::with_default_handlers(recording.collaborators());

        let outcome = dispatcher
            .dispatch(
                ActionKind::SendEmail,
                &params(&[("subject", json!("Welcome")), ("body", json!("Hello!"))]),
                &email_event(),
            )
            .await;

        assert!(matches!(outcome, DispatchOutcome::Success { .. }));
        let sent = recording.sent_emails();
        assert_eq!(sent.len(), 1);
        // Recipient fell back to the event contact.
        assert_eq!(sent[0].to, "customer@example.com");
    }

    #[tokio::test]
    async fn missing_params_fail_with_a_readable_reason() {
        let recording = RecordingCollaborators::new();
        let dispatcher = ActionDispatcher::with_default_handlers(recording.collaborators());

        let outcome =
            dispatcher.dispatch(ActionKind::SendEmail, &Map::new(), &email_event()).await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { ref reason } if reason.contains("subject")
        ));
        assert!(recording.sent_emails().is_empty());
    }

    #[tokio::test]
    async fn ai_reply_success_sends_the_generated_email() {
        let recording = RecordingCollaborators::new();
        let mut collaborators = recording.collaborators();
        collaborators.replies = Arc::new(StaticReplyGenerator::succeeding("Thanks for asking!"));
        let dispatcher = ActionDispatcher::with_default_handlers(collaborators);

        let outcome =
            dispatcher.dispatch(ActionKind::GenerateAiReply, &Map::new(), &email_event()).await;

        assert!(matches!(outcome, DispatchOutcome::Success { .. }));
        let sent = recording.sent_emails();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Re: Pricing question");
        assert_eq!(sent[0].body, "Thanks for asking!");
    }

    #[tokio::test]
    async fn ai_reply_pipeline_failure_fails_with_the_error_kind() {
        let recording = RecordingCollaborators::new();
        let mut collaborators = recording.collaborators();
        collaborators.replies =
            Arc::new(StaticReplyGenerator::failing(RoutingErrorKind::BudgetExceeded));
        let dispatcher = ActionDispatcher::with_default_handlers(collaborators);

        let outcome =
            dispatcher.dispatch(ActionKind::GenerateAiReply, &Map::new(), &email_event()).await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { ref reason } if reason.contains("budget_exceeded")
        ));
        assert!(recording.sent_emails().is_empty());
    }

    #[tokio::test]
    async fn collaborator_failure_becomes_failed_not_a_panic() {
        let recording = RecordingCollaborators::new();
        let mut collaborators = recording.collaborators();
        collaborators.mailer = Arc::new(FailingMailer::new("smtp unreachable"));
        let dispatcher = ActionDispatcher::with_default_handlers(collaborators);

        let outcome = dispatcher
            .dispatch(
                ActionKind::SendEmail,
                &params(&[("subject", json!("Welcome")), ("body", json!("Hello!"))]),
                &email_event(),
            )
            .await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { ref reason } if reason.contains("smtp unreachable")
        ));
    }

    #[tokio::test]
    async fn webhook_handler_posts_the_event_payload() {
        let recording = RecordingCollaborators::new();
        let dispatcher = ActionDispatcher::with_default_handlers(recording.collaborators());

        let outcome = dispatcher
            .dispatch(
                ActionKind::TriggerWebhook,
                &params(&[("url", json!("https://hooks.example.com/inbound"))]),
                &email_event(),
            )
            .await;

        assert!(matches!(outcome, DispatchOutcome::Success { .. }));
        let calls = recording.webhook_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "https://hooks.example.com/inbound");
        assert_eq!(calls[0].payload["trigger_kind"], json!("email_received"));
    }
}
