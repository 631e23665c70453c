//! Recording collaborator fakes for engine and dispatcher tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::actions::dispatcher::Collaborators;
use crate::actions::handlers::{
    CollaboratorError, CrmClient, Labeler, Mailer, Notifier, ReplyGenerator, WebhookCaller,
};
use crate::domain::routing::{Intent, RoutingErrorKind, RoutingRequest, RoutingResult};
use crate::domain::rule::OwnerId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentEmail {
    pub owner_id: OwnerId,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WebhookCall {
    pub url: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrmCall {
    StageUpdate { lead_id: String, stage: String },
    Activity { lead_id: String, note: String },
    Task { title: String },
    FollowUp { contact: String, delay_days: i64 },
}

#[derive(Default)]
struct Recorded {
    emails: Vec<SentEmail>,
    crm_calls: Vec<CrmCall>,
    labels: Vec<(String, String)>,
    archived: Vec<String>,
    notifications: Vec<String>,
    webhooks: Vec<WebhookCall>,
}

/// Shared recorder behind every fake collaborator, so a test can wire one
/// dispatcher and inspect all side effects afterwards.
#[derive(Clone, Default)]
pub struct RecordingCollaborators {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            mailer: Arc::new(self.clone()),
            crm: Arc::new(self.clone()),
            labeler: Arc::new(self.clone()),
            notifier: Arc::new(self.clone()),
            webhooks: Arc::new(self.clone()),
            replies: Arc::new(StaticReplyGenerator::succeeding("ok")),
        }
    }

    pub fn sent_emails(&self) -> Vec<SentEmail> {
        self.recorded.lock().expect("recorder lock").emails.clone()
    }

    pub fn crm_calls(&self) -> Vec<CrmCall> {
        self.recorded.lock().expect("recorder lock").crm_calls.clone()
    }

    pub fn applied_labels(&self) -> Vec<(String, String)> {
        self.recorded.lock().expect("recorder lock").labels.clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.recorded.lock().expect("recorder lock").notifications.clone()
    }

    pub fn webhook_calls(&self) -> Vec<WebhookCall> {
        self.recorded.lock().expect("recorder lock").webhooks.clone()
    }

    pub fn side_effect_count(&self) -> usize {
        let recorded = self.recorded.lock().expect("recorder lock");
        recorded.emails.len()
            + recorded.crm_calls.len()
            + recorded.labels.len()
            + recorded.archived.len()
            + recorded.notifications.len()
            + recorded.webhooks.len()
    }
}

#[async_trait]
impl Mailer for RecordingCollaborators {
    async fn send_email(
        &self,
        owner_id: &OwnerId,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").emails.push(SentEmail {
            owner_id: owner_id.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl CrmClient for RecordingCollaborators {
    async fn update_lead_stage(
        &self,
        _owner_id: &OwnerId,
        lead_id: &str,
        stage: &str,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").crm_calls.push(CrmCall::StageUpdate {
            lead_id: lead_id.to_string(),
            stage: stage.to_string(),
        });
        Ok(())
    }

    async fn add_lead_activity(
        &self,
        _owner_id: &OwnerId,
        lead_id: &str,
        note: &str,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").crm_calls.push(CrmCall::Activity {
            lead_id: lead_id.to_string(),
            note: note.to_string(),
        });
        Ok(())
    }

    async fn create_task(
        &self,
        _owner_id: &OwnerId,
        title: &str,
        _due_in_days: Option<i64>,
    ) -> Result<(), CollaboratorError> {
        self.recorded
            .lock()
            .expect("recorder lock")
            .crm_calls
            .push(CrmCall::Task { title: title.to_string() });
        Ok(())
    }

    async fn schedule_follow_up(
        &self,
        _owner_id: &OwnerId,
        contact: &str,
        delay_days: i64,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").crm_calls.push(CrmCall::FollowUp {
            contact: contact.to_string(),
            delay_days,
        });
        Ok(())
    }
}

#[async_trait]
impl Labeler for RecordingCollaborators {
    async fn apply_label(
        &self,
        _owner_id: &OwnerId,
        message_id: &str,
        label: &str,
    ) -> Result<(), CollaboratorError> {
        self.recorded
            .lock()
            .expect("recorder lock")
            .labels
            .push((message_id.to_string(), label.to_string()));
        Ok(())
    }

    async fn archive_email(
        &self,
        _owner_id: &OwnerId,
        message_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").archived.push(message_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingCollaborators {
    async fn notify(&self, _owner_id: &OwnerId, message: &str) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").notifications.push(message.to_string());
        Ok(())
    }
}

#[async_trait]
impl WebhookCaller for RecordingCollaborators {
    async fn call(
        &self,
        _owner_id: &OwnerId,
        url: &str,
        payload: &Value,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().expect("recorder lock").webhooks.push(WebhookCall {
            url: url.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Mailer that always fails, for failure-path tests.
pub struct FailingMailer {
    message: String,
}

impl FailingMailer {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[async_trait]
impl Mailer for FailingMailer {
    async fn send_email(
        &self,
        _owner_id: &OwnerId,
        _to: &str,
        _subject: &str,
        _body: &str,
    ) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::new(&self.message))
    }
}

/// Reply generator with a canned outcome, standing in for the routing
/// pipeline.
pub struct StaticReplyGenerator {
    content: String,
    error_kind: Option<RoutingErrorKind>,
}

impl StaticReplyGenerator {
    pub fn succeeding(content: impl Into<String>) -> Self {
        Self { content: content.into(), error_kind: None }
    }

    pub fn failing(error_kind: RoutingErrorKind) -> Self {
        Self { content: String::new(), error_kind: Some(error_kind) }
    }
}

#[async_trait]
impl ReplyGenerator for StaticReplyGenerator {
    async fn generate(&self, request: RoutingRequest) -> RoutingResult {
        let intent = request.intent.unwrap_or(Intent::EmailReply);
        RoutingResult {
            success: self.error_kind.is_none(),
            content: self.content.clone(),
            intent,
            model_used: "starling-pro".to_string(),
            tokens_used: 42,
            cost_usd: Decimal::ZERO,
            latency_ms: 1,
            trace_id: Uuid::new_v4().to_string(),
            validated: false,
            error_kind: self.error_kind,
        }
    }
}
