//! Persistence seam of the engine.
//!
//! Every counter mutation is an in-place increment performed by the store,
//! never a read-modify-write by the caller, so concurrent members finishing
//! steps cannot lose updates.

use async_trait::async_trait;
use automation_core::AutomationResult;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::types::{
    MemberStatus, StepExecution, Workflow, WorkflowGoal, WorkflowMember, WorkflowStatus,
    WorkflowStep,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCounter {
    Sent,
    Delivered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberCounter {
    EmailsSent,
    SmsSent,
}

/// Where the advancer moves a member next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlacement {
    pub step_id: Uuid,
    pub entered_at: DateTime<Utc>,
    pub next_action_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ─── Definitions ────────────────────────────────────────────────────

    async fn insert_workflow(&self, workflow: Workflow) -> AutomationResult<()>;

    async fn get_workflow(&self, id: Uuid) -> AutomationResult<Option<Workflow>>;

    async fn list_workflows(&self, tenant_id: &str) -> AutomationResult<Vec<Workflow>>;

    /// Compare-and-set: fails with `InvalidTransition` unless the workflow is
    /// currently in `from`.
    async fn set_workflow_status(
        &self,
        id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        at: DateTime<Utc>,
    ) -> AutomationResult<Workflow>;

    /// Fails with `InvalidStep` if the step order is already taken.
    async fn insert_step(&self, step: WorkflowStep) -> AutomationResult<()>;

    async fn get_step(&self, id: Uuid) -> AutomationResult<Option<WorkflowStep>>;

    /// Steps of a workflow in ascending step order.
    async fn steps_for_workflow(&self, workflow_id: Uuid) -> AutomationResult<Vec<WorkflowStep>>;

    /// The step with the smallest order strictly greater than `step_order`.
    async fn next_step_after(
        &self,
        workflow_id: Uuid,
        step_order: u32,
    ) -> AutomationResult<Option<WorkflowStep>>;

    async fn increment_step_counter(&self, step_id: Uuid, counter: StepCounter)
        -> AutomationResult<()>;

    async fn insert_goal(&self, goal: WorkflowGoal) -> AutomationResult<()>;

    async fn get_goal(&self, id: Uuid) -> AutomationResult<Option<WorkflowGoal>>;

    async fn goals_for_workflow(&self, workflow_id: Uuid) -> AutomationResult<Vec<WorkflowGoal>>;

    async fn increment_goal_achieved(&self, goal_id: Uuid) -> AutomationResult<()>;

    // ─── Members ────────────────────────────────────────────────────────

    /// Inserts a member and bumps the workflow's entry and active counters in
    /// the same operation. With `exclusive`, fails with `AlreadyEnrolled` if
    /// the customer already has an active member in the workflow.
    async fn insert_member(&self, member: WorkflowMember, exclusive: bool) -> AutomationResult<()>;

    async fn get_member(&self, id: Uuid) -> AutomationResult<Option<WorkflowMember>>;

    /// The most recently enrolled active member for the pair.
    async fn find_active_member(
        &self,
        workflow_id: Uuid,
        customer_id: &str,
    ) -> AutomationResult<Option<WorkflowMember>>;

    async fn members_for_workflow(&self, workflow_id: Uuid)
        -> AutomationResult<Vec<WorkflowMember>>;

    /// Selects up to `limit` claimable members of active workflows, earliest
    /// due first, and claims each one atomically with the selection. A
    /// member claimed by a concurrent caller is skipped.
    async fn claim_due_members(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> AutomationResult<Vec<WorkflowMember>>;

    /// Drops the claim and puts the member back to waiting with its due time
    /// unchanged. A failed release bumps `consecutive_failures`.
    async fn release_claim(
        &self,
        member_id: Uuid,
        token: Uuid,
        failed: bool,
    ) -> AutomationResult<WorkflowMember>;

    /// Moves a claimed member onto a new step and back to waiting.
    async fn move_member(
        &self,
        member_id: Uuid,
        token: Uuid,
        placement: StepPlacement,
    ) -> AutomationResult<WorkflowMember>;

    /// Puts an active member into a terminal status and adjusts the
    /// workflow's active/completed counters. With a token, the caller must
    /// still hold the claim.
    async fn finish_member(
        &self,
        member_id: Uuid,
        token: Option<Uuid>,
        status: MemberStatus,
        at: DateTime<Utc>,
    ) -> AutomationResult<WorkflowMember>;

    async fn increment_member_counter(
        &self,
        member_id: Uuid,
        counter: MemberCounter,
    ) -> AutomationResult<()>;

    /// Marks the member converted and adds one conversion and `value`
    /// revenue to the workflow.
    async fn record_conversion(
        &self,
        member_id: Uuid,
        value: f64,
        at: DateTime<Utc>,
    ) -> AutomationResult<WorkflowMember>;

    // ─── Audit ──────────────────────────────────────────────────────────

    async fn append_execution(&self, execution: StepExecution) -> AutomationResult<()>;

    async fn executions_for_member(&self, member_id: Uuid)
        -> AutomationResult<Vec<StepExecution>>;

    async fn executions_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> AutomationResult<Vec<StepExecution>>;
}
