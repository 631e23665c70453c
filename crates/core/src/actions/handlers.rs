//! One handler per action kind. Handlers interpret the rule's opaque
//! `action_params`, pull whatever else they need from the trigger event, and
//! delegate the side effect to an external collaborator.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::event::TriggerEvent;
use crate::domain::routing::{Intent, RoutingRequest, RoutingResult};
use crate::domain::rule::{ActionKind, OwnerId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("missing action parameter `{0}`")]
    MissingParam(&'static str),
    #[error("missing event field `{0}`")]
    MissingEventField(&'static str),
    #[error("{collaborator} call failed: {source}")]
    Collaborator { collaborator: &'static str, source: CollaboratorError },
    #[error("ai reply generation failed: {0}")]
    ReplyGeneration(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActionOutcome {
    pub details: Value,
}

impl ActionOutcome {
    pub fn with_details(details: Value) -> Self {
        Self { details }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError>;
}

// Collaborator seams. Implementations live outside the core: the server
// wires real integrations, tests wire recording fakes.

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(
        &self,
        owner_id: &OwnerId,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn update_lead_stage(
        &self,
        owner_id: &OwnerId,
        lead_id: &str,
        stage: &str,
    ) -> Result<(), CollaboratorError>;

    async fn add_lead_activity(
        &self,
        owner_id: &OwnerId,
        lead_id: &str,
        note: &str,
    ) -> Result<(), CollaboratorError>;

    async fn create_task(
        &self,
        owner_id: &OwnerId,
        title: &str,
        due_in_days: Option<i64>,
    ) -> Result<(), CollaboratorError>;

    async fn schedule_follow_up(
        &self,
        owner_id: &OwnerId,
        contact: &str,
        delay_days: i64,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Labeler: Send + Sync {
    async fn apply_label(
        &self,
        owner_id: &OwnerId,
        message_id: &str,
        label: &str,
    ) -> Result<(), CollaboratorError>;

    async fn archive_email(
        &self,
        owner_id: &OwnerId,
        message_id: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner_id: &OwnerId, message: &str) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn call(
        &self,
        owner_id: &OwnerId,
        url: &str,
        payload: &Value,
    ) -> Result<(), CollaboratorError>;
}

/// Seam into the AI routing pipeline. The router crate implements this; the
/// pipeline reports failures inside the result, never as an Err.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, request: RoutingRequest) -> RoutingResult;
}

fn param_str<'a>(
    params: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a str, HandlerError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or(HandlerError::MissingParam(key))
}

fn param_i64(params: &Map<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

fn collaborator_err(
    collaborator: &'static str,
) -> impl FnOnce(CollaboratorError) -> HandlerError {
    move |source| HandlerError::Collaborator { collaborator, source }
}

pub struct SendEmailHandler {
    mailer: std::sync::Arc<dyn Mailer>,
}

impl SendEmailHandler {
    pub fn new(mailer: std::sync::Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl ActionHandler for SendEmailHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::SendEmail
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        // Recipient comes from the params or falls back to the event contact.
        let to = match params.get("to").and_then(Value::as_str) {
            Some(to) if !to.trim().is_empty() => to.to_string(),
            _ => event.contact().ok_or(HandlerError::MissingParam("to"))?.to_string(),
        };
        let subject = param_str(params, "subject")?;
        let body = param_str(params, "body")?;

        self.mailer
            .send_email(&event.owner_id, &to, subject, body)
            .await
            .map_err(collaborator_err("mailer"))?;

        Ok(ActionOutcome::with_details(json!({ "to": to, "subject": subject })))
    }
}

pub struct UpdateLeadStageHandler {
    crm: std::sync::Arc<dyn CrmClient>,
}

impl UpdateLeadStageHandler {
    pub fn new(crm: std::sync::Arc<dyn CrmClient>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for UpdateLeadStageHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateLeadStage
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let stage = param_str(params, "stage")?;
        let lead_id = match params.get("lead_id").and_then(Value::as_str) {
            Some(lead_id) if !lead_id.is_empty() => lead_id,
            _ => event.payload_str("lead_id").ok_or(HandlerError::MissingEventField("lead_id"))?,
        };

        self.crm
            .update_lead_stage(&event.owner_id, lead_id, stage)
            .await
            .map_err(collaborator_err("crm"))?;

        Ok(ActionOutcome::with_details(json!({ "lead_id": lead_id, "stage": stage })))
    }
}

pub struct AddLeadActivityHandler {
    crm: std::sync::Arc<dyn CrmClient>,
}

impl AddLeadActivityHandler {
    pub fn new(crm: std::sync::Arc<dyn CrmClient>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for AddLeadActivityHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::AddLeadActivity
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let note = param_str(params, "note")?;
        let lead_id = match params.get("lead_id").and_then(Value::as_str) {
            Some(lead_id) if !lead_id.is_empty() => lead_id,
            _ => event.payload_str("lead_id").ok_or(HandlerError::MissingEventField("lead_id"))?,
        };

        self.crm
            .add_lead_activity(&event.owner_id, lead_id, note)
            .await
            .map_err(collaborator_err("crm"))?;

        Ok(ActionOutcome::with_details(json!({ "lead_id": lead_id })))
    }
}

pub struct ApplyLabelHandler {
    labeler: std::sync::Arc<dyn Labeler>,
}

impl ApplyLabelHandler {
    pub fn new(labeler: std::sync::Arc<dyn Labeler>) -> Self {
        Self { labeler }
    }
}

#[async_trait]
impl ActionHandler for ApplyLabelHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ApplyLabel
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let label = param_str(params, "label")?;
        let message_id =
            event.payload_str("message_id").ok_or(HandlerError::MissingEventField("message_id"))?;

        self.labeler
            .apply_label(&event.owner_id, message_id, label)
            .await
            .map_err(collaborator_err("labeler"))?;

        Ok(ActionOutcome::with_details(json!({ "message_id": message_id, "label": label })))
    }
}

pub struct ArchiveEmailHandler {
    labeler: std::sync::Arc<dyn Labeler>,
}

impl ArchiveEmailHandler {
    pub fn new(labeler: std::sync::Arc<dyn Labeler>) -> Self {
        Self { labeler }
    }
}

#[async_trait]
impl ActionHandler for ArchiveEmailHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ArchiveEmail
    }

    async fn execute(
        &self,
        _params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let message_id =
            event.payload_str("message_id").ok_or(HandlerError::MissingEventField("message_id"))?;

        self.labeler
            .archive_email(&event.owner_id, message_id)
            .await
            .map_err(collaborator_err("labeler"))?;

        Ok(ActionOutcome::with_details(json!({ "message_id": message_id })))
    }
}

pub struct CreateTaskHandler {
    crm: std::sync::Arc<dyn CrmClient>,
}

impl CreateTaskHandler {
    pub fn new(crm: std::sync::Arc<dyn CrmClient>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for CreateTaskHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::CreateTask
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let title = param_str(params, "title")?;
        let due_in_days = param_i64(params, "due_in_days");

        self.crm
            .create_task(&event.owner_id, title, due_in_days)
            .await
            .map_err(collaborator_err("crm"))?;

        Ok(ActionOutcome::with_details(json!({ "title": title, "due_in_days": due_in_days })))
    }
}

pub struct SendNotificationHandler {
    notifier: std::sync::Arc<dyn Notifier>,
}

impl SendNotificationHandler {
    pub fn new(notifier: std::sync::Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionHandler for SendNotificationHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::SendNotification
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let message = param_str(params, "message")?;

        self.notifier
            .notify(&event.owner_id, message)
            .await
            .map_err(collaborator_err("notifier"))?;

        Ok(ActionOutcome::with_details(json!({ "message": message })))
    }
}

pub struct ScheduleFollowUpHandler {
    crm: std::sync::Arc<dyn CrmClient>,
}

impl ScheduleFollowUpHandler {
    pub fn new(crm: std::sync::Arc<dyn CrmClient>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for ScheduleFollowUpHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ScheduleFollowUp
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let contact = event.contact().ok_or(HandlerError::MissingEventField("contact"))?;
        let delay_days = param_i64(params, "delay_days").unwrap_or(3);

        self.crm
            .schedule_follow_up(&event.owner_id, contact, delay_days)
            .await
            .map_err(collaborator_err("crm"))?;

        Ok(ActionOutcome::with_details(json!({ "contact": contact, "delay_days": delay_days })))
    }
}

pub struct TriggerWebhookHandler {
    webhooks: std::sync::Arc<dyn WebhookCaller>,
}

impl TriggerWebhookHandler {
    pub fn new(webhooks: std::sync::Arc<dyn WebhookCaller>) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl ActionHandler for TriggerWebhookHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::TriggerWebhook
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let url = param_str(params, "url")?;
        let payload = json!({
            "trigger_kind": event.kind.as_str(),
            "owner_id": event.owner_id.0,
            "occurred_at": event.occurred_at,
            "payload": Value::Object(event.payload.clone()),
        });

        self.webhooks
            .call(&event.owner_id, url, &payload)
            .await
            .map_err(collaborator_err("webhook"))?;

        Ok(ActionOutcome::with_details(json!({ "url": url })))
    }
}

/// Generates an AI reply through the routing pipeline, then sends it.
/// A pipeline failure fails the whole action with the pipeline's error kind.
pub struct GenerateAiReplyHandler {
    replies: std::sync::Arc<dyn ReplyGenerator>,
    mailer: std::sync::Arc<dyn Mailer>,
}

impl GenerateAiReplyHandler {
    pub fn new(
        replies: std::sync::Arc<dyn ReplyGenerator>,
        mailer: std::sync::Arc<dyn Mailer>,
    ) -> Self {
        Self { replies, mailer }
    }
}

#[async_trait]
impl ActionHandler for GenerateAiReplyHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::GenerateAiReply
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        event: &TriggerEvent,
    ) -> Result<ActionOutcome, HandlerError> {
        let to = event.contact().ok_or(HandlerError::MissingEventField("sender_email"))?;
        let incoming_subject = event.payload_str("subject").unwrap_or("(no subject)");
        let body = event.payload_str("body").unwrap_or_default();

        let mut request =
            RoutingRequest::new(body.to_string()).with_intent(Intent::EmailReply);
        request = request.with_context("subject", incoming_subject);
        if let Some(tone) = params.get("tone").and_then(Value::as_str) {
            request = request.with_context("tone", tone);
        }

        let result = self.replies.generate(request).await;
        if !result.success {
            let kind = result
                .error_kind
                .map(|kind| kind.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(HandlerError::ReplyGeneration(kind));
        }

        let reply_subject = format!("Re: {incoming_subject}");
        self.mailer
            .send_email(&event.owner_id, to, &reply_subject, &result.content)
            .await
            .map_err(collaborator_err("mailer"))?;

        Ok(ActionOutcome::with_details(json!({
            "to": to,
            "subject": reply_subject,
            "model_used": result.model_used,
            "cost_usd": result.cost_usd,
            "trace_id": result.trace_id,
        })))
    }
}
