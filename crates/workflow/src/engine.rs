use std::sync::Arc;

use automation_core::event_bus::{noop_sink, EventSink};
use automation_core::{AppConfig, AutomationError, AutomationResult};
use tracing::info;
use uuid::Uuid;

use crate::advancer::Advancer;
use crate::enrollment::EnrollmentManager;
use crate::executor::{Channels, StepExecutor};
use crate::goals::GoalTracker;
use crate::performance;
use crate::scheduler::{Scheduler, TickReport};
use crate::state_machine::WorkflowStateMachine;
use crate::store::{StepCounter, WorkflowStore};
use crate::timing::{self, Clock, SystemClock};
use crate::types::{
    NewStep, NewWorkflow, StepAction, StepCounters, StepExecution, Workflow, WorkflowCounters,
    WorkflowGoal, WorkflowMember, WorkflowPerformance, WorkflowStatus, WorkflowStep,
};

/// Entry point of the automation engine: workflow authoring, enrollment,
/// the scheduler tick, goal tracking and reporting.
#[derive(Clone)]
pub struct AutomationEngine {
    store: Arc<dyn WorkflowStore>,
    channels: Channels,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    state_machine: WorkflowStateMachine,
    enrollment: EnrollmentManager,
    advancer: Advancer,
    scheduler: Scheduler,
    goals: GoalTracker,
}

impl std::fmt::Debug for AutomationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("node_id", &self.config.node_id)
            .finish()
    }
}

impl AutomationEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, channels: Channels, config: AppConfig) -> Self {
        Self::assemble(store, channels, config, Arc::new(SystemClock), noop_sink())
    }

    /// Replace the clock, e.g. with a `ManualClock` in tests.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(self.store, self.channels, self.config, clock, self.event_sink)
    }

    /// Attach an event sink for emitting lifecycle events.
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        Self::assemble(self.store, self.channels, self.config, self.clock, sink)
    }

    fn assemble(
        store: Arc<dyn WorkflowStore>,
        channels: Channels,
        config: AppConfig,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let executor = StepExecutor::new(channels.clone(), store.clone(), config.channels.clone());
        let advancer = Advancer::new(store.clone(), clock.clone(), event_sink.clone());
        let scheduler = Scheduler::new(
            store.clone(),
            executor,
            advancer.clone(),
            clock.clone(),
            event_sink.clone(),
            config.scheduler.clone(),
            &config.node_id,
        );
        Self {
            enrollment: EnrollmentManager::new(store.clone(), clock.clone(), event_sink.clone()),
            goals: GoalTracker::new(store.clone(), clock.clone(), event_sink.clone()),
            state_machine: WorkflowStateMachine::new(),
            advancer,
            scheduler,
            store,
            channels,
            config,
            clock,
            event_sink,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ─── Authoring ──────────────────────────────────────────────────────

    /// Stores a new workflow in `draft` status.
    pub async fn create_workflow(&self, new: NewWorkflow) -> AutomationResult<Workflow> {
        let now = self.clock.now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            description: new.description,
            workflow_kind: new.workflow_kind,
            trigger_kind: new.trigger_kind,
            trigger_config: new.trigger_config,
            entry_criteria: new.entry_criteria,
            can_re_enter: new.can_re_enter,
            send_time_optimization: new.send_time_optimization,
            sender: new.sender,
            status: WorkflowStatus::Draft,
            counters: WorkflowCounters::default(),
            created_at: now,
            updated_at: now,
            activated_at: None,
        };
        self.store.insert_workflow(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "Created workflow");
        Ok(workflow)
    }

    /// Appends a step to a draft workflow.
    pub async fn add_step(
        &self,
        workflow_id: Uuid,
        new: NewStep,
    ) -> AutomationResult<WorkflowStep> {
        let workflow = self.require_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Draft {
            return Err(AutomationError::WorkflowLocked(workflow_id));
        }
        self.validate_action(&new.action)?;
        let send_time = new
            .send_time
            .as_deref()
            .map(timing::parse_send_time)
            .transpose()?;
        timing::next_action_at(self.clock.now(), &new.delay, send_time)?;

        let step = WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id,
            name: new.name,
            step_order: new.step_order,
            delay: new.delay,
            send_time,
            action: new.action,
            counters: StepCounters::default(),
            created_at: self.clock.now(),
        };
        self.store.insert_step(step.clone()).await?;
        info!(
            workflow_id = %workflow_id,
            step_id = %step.id,
            order = step.step_order,
            kind = step.action.kind().as_str(),
            "Added workflow step"
        );
        Ok(step)
    }

    pub async fn add_goal(
        &self,
        workflow_id: Uuid,
        name: &str,
        goal_kind: &str,
    ) -> AutomationResult<WorkflowGoal> {
        self.require_workflow(workflow_id).await?;
        let goal = WorkflowGoal {
            id: Uuid::new_v4(),
            workflow_id,
            name: name.to_string(),
            goal_kind: goal_kind.to_string(),
            total_achieved: 0,
            created_at: self.clock.now(),
        };
        self.store.insert_goal(goal.clone()).await?;
        Ok(goal)
    }

    fn validate_action(&self, action: &StepAction) -> AutomationResult<()> {
        match action {
            StepAction::Condition(condition) => {
                if !self.config.conditions.is_allowed(&condition.rule.field) {
                    return Err(AutomationError::InvalidStep(format!(
                        "condition field `{}` is not allowed",
                        condition.rule.field
                    )));
                }
            }
            StepAction::Webhook(webhook) => {
                if let Some(raw) = webhook.url.as_deref().filter(|u| !u.trim().is_empty()) {
                    let parsed = url::Url::parse(raw.trim()).map_err(|e| {
                        AutomationError::InvalidStep(format!("invalid webhook url `{raw}`: {e}"))
                    })?;
                    if !matches!(parsed.scheme(), "http" | "https") {
                        return Err(AutomationError::InvalidStep(format!(
                            "webhook url `{raw}` must use http or https"
                        )));
                    }
                }
            }
            StepAction::Email(_) | StepAction::Sms(_) | StepAction::Wait => {}
        }
        Ok(())
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Moves a draft workflow to `active` once it has steps and every
    /// condition target is one of its own steps.
    pub async fn activate_workflow(&self, workflow_id: Uuid) -> AutomationResult<Workflow> {
        let workflow = self.require_workflow(workflow_id).await?;
        let steps = self.store.steps_for_workflow(workflow_id).await?;
        if steps.is_empty() {
            return Err(AutomationError::EmptyWorkflow(workflow_id));
        }
        for step in &steps {
            if let StepAction::Condition(condition) = &step.action {
                for target in [condition.true_next_step, condition.false_next_step]
                    .into_iter()
                    .flatten()
                {
                    if !steps.iter().any(|s| s.id == target) {
                        return Err(AutomationError::InvalidStep(format!(
                            "condition step {} points at unknown step {target}",
                            step.id
                        )));
                    }
                }
            }
        }
        self.transition(workflow, "activate").await
    }

    pub async fn pause_workflow(&self, workflow_id: Uuid) -> AutomationResult<Workflow> {
        let workflow = self.require_workflow(workflow_id).await?;
        self.transition(workflow, "pause").await
    }

    pub async fn resume_workflow(&self, workflow_id: Uuid) -> AutomationResult<Workflow> {
        let workflow = self.require_workflow(workflow_id).await?;
        self.transition(workflow, "resume").await
    }

    pub async fn complete_workflow(&self, workflow_id: Uuid) -> AutomationResult<Workflow> {
        let workflow = self.require_workflow(workflow_id).await?;
        self.transition(workflow, "complete").await
    }

    async fn transition(&self, workflow: Workflow, trigger: &str) -> AutomationResult<Workflow> {
        let to = self.state_machine.next(workflow.status, trigger)?;
        let updated = self
            .store
            .set_workflow_status(workflow.id, workflow.status, to, self.clock.now())
            .await?;
        info!(
            workflow_id = %workflow.id,
            from = workflow.status.as_str(),
            to = to.as_str(),
            "Workflow status changed"
        );
        Ok(updated)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub async fn get_workflow(&self, workflow_id: Uuid) -> AutomationResult<Option<Workflow>> {
        self.store.get_workflow(workflow_id).await
    }

    pub async fn list_workflows(&self, tenant_id: &str) -> AutomationResult<Vec<Workflow>> {
        self.store.list_workflows(tenant_id).await
    }

    pub async fn workflow_steps(&self, workflow_id: Uuid) -> AutomationResult<Vec<WorkflowStep>> {
        self.store.steps_for_workflow(workflow_id).await
    }

    pub async fn get_member(&self, member_id: Uuid) -> AutomationResult<Option<WorkflowMember>> {
        self.store.get_member(member_id).await
    }

    pub async fn executions_for_member(
        &self,
        member_id: Uuid,
    ) -> AutomationResult<Vec<StepExecution>> {
        self.store.executions_for_member(member_id).await
    }

    async fn require_workflow(&self, workflow_id: Uuid) -> AutomationResult<Workflow> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(workflow_id))
    }

    // ─── Members ────────────────────────────────────────────────────────

    pub async fn enroll_customer(
        &self,
        workflow_id: Uuid,
        customer_id: &str,
        tenant_id: &str,
        entry_trigger: &str,
    ) -> AutomationResult<WorkflowMember> {
        self.enrollment
            .enroll(workflow_id, customer_id, tenant_id, entry_trigger)
            .await
    }

    /// Administrative exit of an active member.
    pub async fn cancel_member(&self, member_id: Uuid) -> AutomationResult<WorkflowMember> {
        self.advancer.cancel(member_id, "cancelled by administrator").await
    }

    /// One scheduler tick over at most `limit` due members.
    pub async fn process_pending_actions(&self, limit: usize) -> AutomationResult<TickReport> {
        self.scheduler.process_pending_actions(limit).await
    }

    // ─── Goals & Metrics ────────────────────────────────────────────────

    pub async fn track_goal_achievement(
        &self,
        workflow_id: Uuid,
        customer_id: &str,
        goal_id: Uuid,
        value: f64,
    ) -> AutomationResult<WorkflowMember> {
        self.goals.track(workflow_id, customer_id, goal_id, value).await
    }

    /// Counts a provider delivery confirmation against a step.
    pub async fn record_delivery(&self, step_id: Uuid) -> AutomationResult<()> {
        self.store
            .increment_step_counter(step_id, StepCounter::Delivered)
            .await
    }

    pub async fn get_workflow_performance(
        &self,
        workflow_id: Uuid,
    ) -> AutomationResult<WorkflowPerformance> {
        let workflow = self.require_workflow(workflow_id).await?;
        let steps = self.store.steps_for_workflow(workflow_id).await?;
        let members = self.store.members_for_workflow(workflow_id).await?;
        let executions = self.store.executions_for_workflow(workflow_id).await?;
        let goals = self.store.goals_for_workflow(workflow_id).await?;
        Ok(performance::summarize(
            &workflow,
            &steps,
            &members,
            &executions,
            goals,
        ))
    }
}
