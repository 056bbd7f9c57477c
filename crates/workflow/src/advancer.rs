use std::sync::Arc;

use automation_core::event_bus::{make_event, EventSink};
use automation_core::types::EventType;
use automation_core::{AutomationError, AutomationResult};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::executor::StepOutcome;
use crate::store::{StepPlacement, WorkflowStore};
use crate::timing::{self, Clock};
use crate::types::{MemberStatus, WorkflowMember, WorkflowStep};

/// Result of moving a member past its current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advancement {
    Moved {
        step_id: Uuid,
        next_action_at: DateTime<Utc>,
    },
    Completed,
}

/// Sole mutator of a member's position and terminal status.
#[derive(Clone)]
pub struct Advancer {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl Advancer {
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

    /// Moves a claimed member past `step`. Linear steps go to the next step
    /// by order; a condition outcome names its target directly. No target
    /// completes the member.
    pub async fn advance(
        &self,
        member: &WorkflowMember,
        step: &WorkflowStep,
        outcome: StepOutcome,
    ) -> AutomationResult<Advancement> {
        let token = member
            .claim_token()
            .ok_or(AutomationError::ClaimLost(member.id))?;

        let next = match outcome {
            StepOutcome::Continue => {
                self.store
                    .next_step_after(member.workflow_id, step.step_order)
                    .await?
            }
            StepOutcome::Branch(None) => None,
            StepOutcome::Branch(Some(target)) => {
                let target_step = self
                    .store
                    .get_step(target)
                    .await?
                    .filter(|s| s.workflow_id == member.workflow_id)
                    .ok_or_else(|| {
                        AutomationError::InvalidStep(format!(
                            "branch target {target} is not a step of workflow {}",
                            member.workflow_id
                        ))
                    })?;
                Some(target_step)
            }
        };

        let now = self.clock.now();
        match next {
            Some(next) => {
                let next_action_at = timing::next_action_at(now, &next.delay, next.send_time)?;
                self.store
                    .move_member(
                        member.id,
                        token,
                        StepPlacement {
                            step_id: next.id,
                            entered_at: now,
                            next_action_at,
                        },
                    )
                    .await?;
                info!(
                    member_id = %member.id,
                    from_step = %step.id,
                    to_step = %next.id,
                    next_action_at = %next_action_at,
                    "Member advanced"
                );
                Ok(Advancement::Moved {
                    step_id: next.id,
                    next_action_at,
                })
            }
            None => {
                self.store
                    .finish_member(member.id, Some(token), MemberStatus::Completed, now)
                    .await?;
                info!(
                    member_id = %member.id,
                    workflow_id = %member.workflow_id,
                    "Member completed workflow"
                );
                metrics::counter!("automation.members_completed").increment(1);
                self.event_sink.emit(make_event(
                    EventType::MemberCompleted,
                    member.workflow_id,
                    Some(member.id),
                    Some(member.customer_id.clone()),
                ));
                Ok(Advancement::Completed)
            }
        }
    }

    /// Cancels an active member regardless of any claim it holds. An
    /// in-flight execution then loses its claim when it tries to advance.
    pub async fn cancel(&self, member_id: Uuid, reason: &str) -> AutomationResult<WorkflowMember> {
        let cancelled = self
            .store
            .finish_member(member_id, None, MemberStatus::Cancelled, self.clock.now())
            .await?;
        info!(member_id = %member_id, reason = %reason, "Member cancelled");
        let mut event = make_event(
            EventType::MemberCancelled,
            cancelled.workflow_id,
            Some(member_id),
            Some(cancelled.customer_id.clone()),
        );
        event.detail = Some(reason.to_string());
        self.event_sink.emit(event);
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automation_core::event_bus::capture_sink;
    use chrono::{Duration, TimeZone};

    use crate::memory::MemoryStore;
    use crate::timing::ManualClock;
    use crate::types::{
        ComparisonOperator, ConditionAction, ConditionRule, Delay, MemberCounters, StepAction,
        StepCounters, TriggerKind, Workflow, WorkflowCounters, WorkflowStatus,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        sink: Arc<automation_core::event_bus::CaptureSink>,
        advancer: Advancer,
        workflow_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        let sink = capture_sink();
        let now = clock.now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            tenant_id: "t".into(),
            name: "wf".into(),
            description: None,
            workflow_kind: "test".into(),
            trigger_kind: TriggerKind::Manual,
            trigger_config: serde_json::Value::Null,
            entry_criteria: serde_json::Value::Null,
            can_re_enter: false,
            send_time_optimization: false,
            sender: None,
            status: WorkflowStatus::Active,
            counters: WorkflowCounters::default(),
            created_at: now,
            updated_at: now,
            activated_at: Some(now),
        };
        let workflow_id = workflow.id;
        store.insert_workflow(workflow).await.unwrap();
        Fixture {
            advancer: Advancer::new(store.clone(), clock.clone(), sink.clone()),
            store,
            clock,
            sink,
            workflow_id,
        }
    }

    async fn step(f: &Fixture, order: u32, delay: Delay, action: StepAction) -> WorkflowStep {
        let step = WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id: f.workflow_id,
            name: format!("step {order}"),
            step_order: order,
            delay,
            send_time: None,
            action,
            counters: StepCounters::default(),
            created_at: f.clock.now(),
        };
        f.store.insert_step(step.clone()).await.unwrap();
        step
    }

    async fn claimed_member(f: &Fixture, at: &WorkflowStep) -> WorkflowMember {
        let now = f.clock.now();
        let member = WorkflowMember {
            id: Uuid::new_v4(),
            workflow_id: f.workflow_id,
            customer_id: "c-1".into(),
            tenant_id: "t".into(),
            entry_trigger: "manual".into(),
            status: MemberStatus::Active,
            current_step_id: at.id,
            current_step_entered_at: now,
            next_action_at: now,
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
        f.store.insert_member(member, true).await.unwrap();
        f.store
            .claim_due_members(now, 10, "test", Duration::minutes(5))
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_linear_advance_applies_next_step_delay() {
        let f = fixture().await;
        let first = step(&f, 1, Delay::NONE, StepAction::Wait).await;
        let second = step(&f, 2, Delay::days(2), StepAction::Wait).await;
        let member = claimed_member(&f, &first).await;

        let outcome = f
            .advancer
            .advance(&member, &first, StepOutcome::Continue)
            .await
            .unwrap();
        let expected = f.clock.now() + Duration::days(2);
        assert_eq!(
            outcome,
            Advancement::Moved {
                step_id: second.id,
                next_action_at: expected
            }
        );

        let stored = f.store.get_member(member.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step_id, second.id);
        assert!(stored.is_waiting);
        assert!(stored.claim.is_none());
        assert_eq!(stored.counters.steps_completed, 1);
    }

    #[tokio::test]
    async fn test_last_step_completes_member() {
        let f = fixture().await;
        let only = step(&f, 1, Delay::NONE, StepAction::Wait).await;
        let member = claimed_member(&f, &only).await;

        let outcome = f
            .advancer
            .advance(&member, &only, StepOutcome::Continue)
            .await
            .unwrap();
        assert_eq!(outcome, Advancement::Completed);

        let stored = f.store.get_member(member.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Completed);
        assert_eq!(stored.completed_at, Some(f.clock.now()));
        let workflow = f.store.get_workflow(f.workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.counters.active_members, 0);
        assert_eq!(workflow.counters.completed_members, 1);
        assert_eq!(f.sink.count_type(EventType::MemberCompleted), 1);
    }

    #[tokio::test]
    async fn test_branch_target_skips_order_lookup() {
        let f = fixture().await;
        let condition = step(
            &f,
            1,
            Delay::NONE,
            StepAction::Condition(ConditionAction {
                rule: ConditionRule {
                    field: "total_purchases".into(),
                    operator: ComparisonOperator::GreaterThan,
                    value: serde_json::json!(5),
                },
                true_next_step: None,
                false_next_step: None,
            }),
        )
        .await;
        let _linear_next = step(&f, 2, Delay::NONE, StepAction::Wait).await;
        let target = step(&f, 3, Delay::hours(1), StepAction::Wait).await;
        let member = claimed_member(&f, &condition).await;

        let outcome = f
            .advancer
            .advance(&member, &condition, StepOutcome::Branch(Some(target.id)))
            .await
            .unwrap();
        assert!(matches!(outcome, Advancement::Moved { step_id, .. } if step_id == target.id));
    }

    #[tokio::test]
    async fn test_branch_to_foreign_step_is_rejected() {
        let f = fixture().await;
        let first = step(&f, 1, Delay::NONE, StepAction::Wait).await;
        let member = claimed_member(&f, &first).await;

        let err = f
            .advancer
            .advance(&member, &first, StepOutcome::Branch(Some(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::InvalidStep(_)));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_inflight_claim() {
        let f = fixture().await;
        let first = step(&f, 1, Delay::NONE, StepAction::Wait).await;
        let _second = step(&f, 2, Delay::NONE, StepAction::Wait).await;
        let member = claimed_member(&f, &first).await;

        let cancelled = f.advancer.cancel(member.id, "admin").await.unwrap();
        assert_eq!(cancelled.status, MemberStatus::Cancelled);
        assert_eq!(f.sink.count_type(EventType::MemberCancelled), 1);

        let err = f
            .advancer
            .advance(&member, &first, StepOutcome::Continue)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ClaimLost(_)));

        let again = f.advancer.cancel(member.id, "admin").await.unwrap_err();
        assert!(matches!(again, AutomationError::InvalidTransition { .. }));
    }
}
