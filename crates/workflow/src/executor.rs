use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use automation_channels::{
    CustomerDirectory, EmailQueue, OutboundEmail, OutboundSms, SmsChannel, WebhookDispatcher,
};
use automation_core::config::ChannelConfig;
use automation_core::types::{Correlation, Customer};
use automation_core::{AutomationError, AutomationResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::evaluator::{personalize, ConditionEvaluator};
use crate::store::{MemberCounter, StepCounter, WorkflowStore};
use crate::types::{
    ConditionAction, EmailAction, SmsAction, StepAction, WebhookAction, Workflow, WorkflowMember,
    WorkflowStep,
};

/// External collaborators the executor talks to.
#[derive(Clone)]
pub struct Channels {
    pub customers: Arc<dyn CustomerDirectory>,
    pub email: Arc<dyn EmailQueue>,
    pub sms: Arc<dyn SmsChannel>,
    pub webhooks: Arc<dyn WebhookDispatcher>,
}

/// What the advancer should do after a step ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Move to the next step by step order.
    Continue,
    /// A condition picked this target; `None` exits the workflow.
    Branch(Option<Uuid>),
}

/// Runs the current step of a claimed member.
#[derive(Clone)]
pub struct StepExecutor {
    channels: Channels,
    store: Arc<dyn WorkflowStore>,
    evaluator: ConditionEvaluator,
    config: ChannelConfig,
}

impl StepExecutor {
    pub fn new(channels: Channels, store: Arc<dyn WorkflowStore>, config: ChannelConfig) -> Self {
        Self {
            channels,
            store,
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub async fn execute(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        member: &WorkflowMember,
    ) -> AutomationResult<StepOutcome> {
        debug!(
            member_id = %member.id,
            step_id = %step.id,
            kind = step.action.kind().as_str(),
            "Executing workflow step"
        );

        match &step.action {
            StepAction::Email(email) => {
                self.send_email(workflow, step, member, email).await?;
                Ok(StepOutcome::Continue)
            }
            StepAction::Sms(sms) => {
                self.send_sms(step, member, sms).await?;
                Ok(StepOutcome::Continue)
            }
            StepAction::Wait => Ok(StepOutcome::Continue),
            StepAction::Condition(condition) => {
                let target = self.evaluate_condition(member, condition).await?;
                Ok(StepOutcome::Branch(target))
            }
            StepAction::Webhook(webhook) => {
                self.call_webhook(step, member, webhook).await?;
                Ok(StepOutcome::Continue)
            }
        }
    }

    async fn send_email(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        member: &WorkflowMember,
        email: &EmailAction,
    ) -> AutomationResult<()> {
        let customer = self.load_customer(&member.customer_id).await?;
        let to_address = customer
            .contact_email()
            .ok_or_else(|| AutomationError::MissingContactInfo {
                customer_id: customer.id.clone(),
                field: "email",
            })?
            .to_string();

        let (from_address, from_name) = match &workflow.sender {
            Some(sender) => (sender.from_email.clone(), sender.from_name.clone()),
            None => (self.config.from_email.clone(), self.config.from_name.clone()),
        };

        let message = OutboundEmail {
            to_address,
            to_name: customer.full_name(),
            subject: personalize(&email.subject, &customer),
            html_body: personalize(&email.body_template, &customer),
            from_address,
            from_name,
            template_id: email.template_id.clone(),
            correlation: correlation(member, step),
        };
        self.bounded("email", self.channels.email.submit(message))
            .await?;

        self.store
            .increment_member_counter(member.id, MemberCounter::EmailsSent)
            .await?;
        self.store
            .increment_step_counter(step.id, StepCounter::Sent)
            .await?;
        info!(member_id = %member.id, step_id = %step.id, "Workflow email queued");
        Ok(())
    }

    async fn send_sms(
        &self,
        step: &WorkflowStep,
        member: &WorkflowMember,
        sms: &SmsAction,
    ) -> AutomationResult<()> {
        let customer = self.load_customer(&member.customer_id).await?;
        let to_phone = customer
            .contact_phone()
            .ok_or_else(|| AutomationError::MissingContactInfo {
                customer_id: customer.id.clone(),
                field: "phone",
            })?
            .to_string();

        let message = OutboundSms {
            to_phone,
            message: personalize(&sms.message_template, &customer),
            correlation: correlation(member, step),
        };
        self.bounded("sms", self.channels.sms.submit(message)).await?;

        self.store
            .increment_member_counter(member.id, MemberCounter::SmsSent)
            .await?;
        self.store
            .increment_step_counter(step.id, StepCounter::Sent)
            .await?;
        info!(member_id = %member.id, step_id = %step.id, "Workflow SMS queued");
        Ok(())
    }

    async fn evaluate_condition(
        &self,
        member: &WorkflowMember,
        condition: &ConditionAction,
    ) -> AutomationResult<Option<Uuid>> {
        let customer = self.load_customer(&member.customer_id).await?;
        Ok(self.evaluator.resolve_branch(condition, &customer))
    }

    async fn call_webhook(
        &self,
        step: &WorkflowStep,
        member: &WorkflowMember,
        webhook: &WebhookAction,
    ) -> AutomationResult<()> {
        let url = webhook
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                AutomationError::MissingConfiguration(format!(
                    "webhook step {} has no target url",
                    step.id
                ))
            })?;

        let customer = self.load_customer(&member.customer_id).await?;
        let mut payload = serde_json::json!({
            "customer": customer.snapshot(),
            "workflow_id": member.workflow_id,
            "step_id": step.id,
            "member_id": member.id,
        });
        if !webhook.payload_shape.is_null() {
            payload["data"] = webhook.payload_shape.clone();
        }

        self.bounded("webhook", self.channels.webhooks.post(url, payload))
            .await?;
        info!(
            member_id = %member.id,
            step_id = %step.id,
            url = %url,
            "Workflow webhook dispatched"
        );
        Ok(())
    }

    async fn load_customer(&self, customer_id: &str) -> AutomationResult<Customer> {
        self.bounded("customer", self.channels.customers.get_customer(customer_id))
            .await?
            .ok_or_else(|| AutomationError::CustomerNotFound(customer_id.to_string()))
    }

    /// Caps a collaborator call at the configured channel timeout.
    async fn bounded<T>(
        &self,
        channel: &'static str,
        call: impl Future<Output = AutomationResult<T>>,
    ) -> AutomationResult<T> {
        let limit = Duration::from_millis(self.config.timeout_ms);
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| AutomationError::ChannelTimeout {
                channel,
                timeout_ms: self.config.timeout_ms,
            })?
    }
}

fn correlation(member: &WorkflowMember, step: &WorkflowStep) -> Correlation {
    Correlation {
        workflow_id: member.workflow_id,
        customer_id: member.customer_id.clone(),
        member_id: member.id,
        step_id: step.id,
    }
}
