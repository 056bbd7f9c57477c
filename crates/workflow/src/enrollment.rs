use std::sync::Arc;

use automation_core::event_bus::{make_event, EventSink};
use automation_core::types::EventType;
use automation_core::{AutomationError, AutomationResult};
use tracing::info;
use uuid::Uuid;

use crate::store::WorkflowStore;
use crate::timing::{self, Clock};
use crate::types::{MemberCounters, MemberStatus, WorkflowMember, WorkflowStatus};

/// Places customers on the first step of an active workflow.
#[derive(Clone)]
pub struct EnrollmentManager {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl EnrollmentManager {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            clock,
            event_sink,
        }
    }

    pub async fn enroll(
        &self,
        workflow_id: Uuid,
        customer_id: &str,
        tenant_id: &str,
        entry_trigger: &str,
    ) -> AutomationResult<WorkflowMember> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(workflow_id))?;
        if workflow.status != WorkflowStatus::Active {
            return Err(AutomationError::WorkflowNotActive(workflow_id));
        }

        let first_step = self
            .store
            .steps_for_workflow(workflow_id)
            .await?
            .into_iter()
            .next()
            .ok_or(AutomationError::EmptyWorkflow(workflow_id))?;

        let now = self.clock.now();
        let next_action_at = timing::next_action_at(now, &first_step.delay, first_step.send_time)?;
        let member = WorkflowMember {
            id: Uuid::new_v4(),
            workflow_id,
            customer_id: customer_id.to_string(),
            tenant_id: tenant_id.to_string(),
            entry_trigger: entry_trigger.to_string(),
            status: MemberStatus::Active,
            current_step_id: first_step.id,
            current_step_entered_at: now,
            next_action_at,
            is_waiting: true,
            claim: None,
            counters: MemberCounters::default(),
            consecutive_failures: 0,
            converted: false,
            converted_at: None,
            conversion_value: None,
            entered_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        // The uniqueness check and the insert are one store operation.
        self.store
            .insert_member(member.clone(), !workflow.can_re_enter)
            .await?;

        info!(
            member_id = %member.id,
            workflow_id = %workflow_id,
            customer_id = %customer_id,
            next_action_at = %member.next_action_at,
            "Customer enrolled in workflow"
        );
        metrics::counter!("automation.members_enrolled").increment(1);
        self.event_sink.emit(make_event(
            EventType::MemberEnrolled,
            workflow_id,
            Some(member.id),
            Some(customer_id.to_string()),
        ));
        Ok(member)
    }
}
