//! Outbound email submission.
//!
//! The engine renders subject and body and hands the message to an
//! `EmailQueue`; delivery happens asynchronously behind the queue.

use async_trait::async_trait;
use automation_core::types::Correlation;
use automation_core::{AutomationError, AutomationResult};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// A rendered message ready for the outbound queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to_address: String,
    pub to_name: String,
    pub subject: String,
    pub html_body: String,
    pub from_address: String,
    pub from_name: String,
    pub template_id: Option<String>,
    pub correlation: Correlation,
}

#[async_trait]
pub trait EmailQueue: Send + Sync {
    /// Accepts the message for later delivery. Returning `Ok` does not
    /// imply the message was delivered.
    async fn submit(&self, email: OutboundEmail) -> AutomationResult<()>;
}

/// An email accepted by the outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEmail {
    pub id: Uuid,
    pub email: OutboundEmail,
    pub queued_at: DateTime<Utc>,
}

/// In-memory email queue that records every accepted message.
#[derive(Default)]
pub struct EmailOutbox {
    queued: Mutex<Vec<QueuedEmail>>,
    per_workflow: DashMap<Uuid, u64>,
    rejected_addresses: DashSet<String>,
}

impl EmailOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later submission to `address` fail with `ChannelRejected`.
    pub fn reject_address(&self, address: &str) {
        self.rejected_addresses.insert(address.to_lowercase());
    }

    pub fn queued(&self) -> Vec<QueuedEmail> {
        self.queued.lock().clone()
    }

    pub fn queued_to(&self, address: &str) -> Vec<QueuedEmail> {
        self.queued
            .lock()
            .iter()
            .filter(|q| q.email.to_address.eq_ignore_ascii_case(address))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.queued.lock().len()
    }

    pub fn count_for_workflow(&self, workflow_id: &Uuid) -> u64 {
        self.per_workflow.get(workflow_id).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl EmailQueue for EmailOutbox {
    async fn submit(&self, email: OutboundEmail) -> AutomationResult<()> {
        if self
            .rejected_addresses
            .contains(&email.to_address.to_lowercase())
        {
            metrics::counter!("automation.emails_rejected").increment(1);
            return Err(AutomationError::ChannelRejected {
                channel: "email",
                reason: format!("recipient {} is suppressed", email.to_address),
            });
        }

        debug!(
            to = %email.to_address,
            subject = %email.subject,
            workflow_id = %email.correlation.workflow_id,
            "Email queued"
        );
        metrics::counter!("automation.emails_queued").increment(1);

        *self
            .per_workflow
            .entry(email.correlation.workflow_id)
            .or_insert(0) += 1;
        self.queued.lock().push(QueuedEmail {
            id: Uuid::new_v4(),
            email,
            queued_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_to(address: &str, workflow_id: Uuid) -> OutboundEmail {
        OutboundEmail {
            to_address: address.to_string(),
            to_name: "Ada Lovelace".to_string(),
            subject: "Welcome".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            from_address: "noreply@example.com".to_string(),
            from_name: "Marketing".to_string(),
            template_id: None,
            correlation: Correlation {
                workflow_id,
                customer_id: "c-1".to_string(),
                member_id: Uuid::new_v4(),
                step_id: Uuid::new_v4(),
            },
        }
    }

    #[tokio::test]
    async fn test_submit_records_message() {
        let outbox = EmailOutbox::new();
        let workflow_id = Uuid::new_v4();
        outbox
            .submit(email_to("ada@example.com", workflow_id))
            .await
            .unwrap();
        outbox
            .submit(email_to("bob@example.com", workflow_id))
            .await
            .unwrap();

        assert_eq!(outbox.count(), 2);
        assert_eq!(outbox.count_for_workflow(&workflow_id), 2);
        assert_eq!(outbox.queued_to("ADA@example.com").len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_address() {
        let outbox = EmailOutbox::new();
        outbox.reject_address("Bounce@Example.com");

        let err = outbox
            .submit(email_to("bounce@example.com", Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AutomationError::ChannelRejected { channel: "email", .. }
        ));
        assert_eq!(outbox.count(), 0);
    }
}
