use std::sync::Arc;

use automation_core::event_bus::{make_event, EventSink};
use automation_core::types::EventType;
use automation_core::{AutomationError, AutomationResult};
use tracing::info;
use uuid::Uuid;

use crate::store::WorkflowStore;
use crate::timing::Clock;
use crate::types::WorkflowMember;

/// Credits conversions to active members.
///
/// Repeated calls for the same member are not deduplicated: each one adds a
/// conversion and its value to the workflow aggregates.
#[derive(Clone)]
pub struct GoalTracker {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl GoalTracker {
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

    pub async fn track(
        &self,
        workflow_id: Uuid,
        customer_id: &str,
        goal_id: Uuid,
        value: f64,
    ) -> AutomationResult<WorkflowMember> {
        let member = self
            .store
            .find_active_member(workflow_id, customer_id)
            .await?
            .ok_or_else(|| AutomationError::MemberNotFound {
                workflow_id,
                customer_id: customer_id.to_string(),
            })?;
        let goal = self
            .store
            .get_goal(goal_id)
            .await?
            .filter(|g| g.workflow_id == workflow_id)
            .ok_or(AutomationError::GoalNotFound(goal_id))?;

        let converted = self
            .store
            .record_conversion(member.id, value, self.clock.now())
            .await?;
        self.store.increment_goal_achieved(goal.id).await?;

        info!(
            member_id = %member.id,
            goal = %goal.name,
            value,
            "Workflow goal achieved"
        );
        metrics::counter!("automation.goals_achieved").increment(1);
        let mut event = make_event(
            EventType::GoalAchieved,
            workflow_id,
            Some(member.id),
            Some(customer_id.to_string()),
        );
        event.detail = Some(goal.name);
        self.event_sink.emit(event);
        Ok(converted)
    }
}
