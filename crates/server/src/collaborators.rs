//! Outbound collaborator wiring. The webhook caller is real; the remaining
//! integrations log their side effects until the provider adapters land.

use std::time::Duration;

use async_trait::async_trait;
use frontdesk_core::actions::handlers::{
    CollaboratorError, CrmClient, Labeler, Mailer, Notifier, WebhookCaller,
};
use frontdesk_core::domain::rule::OwnerId;
use serde_json::Value;
use tracing::info;

/// Posts the event payload to the rule's webhook URL.
pub struct HttpWebhookCaller {
    http: reqwest::Client,
}

impl HttpWebhookCaller {
    pub fn new(timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| CollaboratorError::new(error.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WebhookCaller for HttpWebhookCaller {
    async fn call(
        &self,
        owner_id: &OwnerId,
        url: &str,
        payload: &Value,
    ) -> Result<(), CollaboratorError> {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|error| CollaboratorError::new(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::new(format!("webhook returned {status}")));
        }

        info!(
            event_name = "collaborator.webhook_delivered",
            owner_id = %owner_id.0,
            url = %url,
            "webhook delivered"
        );
        Ok(())
    }
}

/// Log-only stand-ins for the provider-backed collaborators.
#[derive(Clone, Copy, Default)]
pub struct LoggingCollaborator;

#[async_trait]
impl Mailer for LoggingCollaborator {
    async fn send_email(
        &self,
        owner_id: &OwnerId,
        to: &str,
        subject: &str,
        _body: &str,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.email_sent",
            owner_id = %owner_id.0,
            to = %to,
            subject = %subject,
            "outbound email dispatched"
        );
        Ok(())
    }
}

#[async_trait]
impl CrmClient for LoggingCollaborator {
    async fn update_lead_stage(
        &self,
        owner_id: &OwnerId,
        lead_id: &str,
        stage: &str,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.lead_stage_updated",
            owner_id = %owner_id.0,
            lead_id = %lead_id,
            stage = %stage,
            "lead stage updated"
        );
        Ok(())
    }

    async fn add_lead_activity(
        &self,
        owner_id: &OwnerId,
        lead_id: &str,
        note: &str,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.lead_activity_added",
            owner_id = %owner_id.0,
            lead_id = %lead_id,
            note = %note,
            "lead activity recorded"
        );
        Ok(())
    }

    async fn create_task(
        &self,
        owner_id: &OwnerId,
        title: &str,
        due_in_days: Option<i64>,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.task_created",
            owner_id = %owner_id.0,
            title = %title,
            due_in_days = due_in_days,
            "task created"
        );
        Ok(())
    }

    async fn schedule_follow_up(
        &self,
        owner_id: &OwnerId,
        contact: &str,
        delay_days: i64,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.follow_up_scheduled",
            owner_id = %owner_id.0,
            contact = %contact,
            delay_days = delay_days,
            "follow-up scheduled"
        );
        Ok(())
    }
}

#[async_trait]
impl Labeler for LoggingCollaborator {
    async fn apply_label(
        &self,
        owner_id: &OwnerId,
        message_id: &str,
        label: &str,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.label_applied",
            owner_id = %owner_id.0,
            message_id = %message_id,
            label = %label,
            "label applied"
        );
        Ok(())
    }

    async fn archive_email(
        &self,
        owner_id: &OwnerId,
        message_id: &str,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.email_archived",
            owner_id = %owner_id.0,
            message_id = %message_id,
            "email archived"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for LoggingCollaborator {
    async fn notify(&self, owner_id: &OwnerId, message: &str) -> Result<(), CollaboratorError> {
        info!(
            event_name = "collaborator.owner_notified",
            owner_id = %owner_id.0,
            message = %message,
            "owner notification dispatched"
        );
        Ok(())
    }
}
