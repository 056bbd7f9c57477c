//! In-memory `WorkflowStore` backed by concurrent maps.
//!
//! Each counter update and each claim happens under the map entry's write
//! lock, which gives the same guarantees as `SET counter = counter + 1` and
//! a conditional `UPDATE ... WHERE is_waiting` in a relational store.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use automation_core::{AutomationError, AutomationResult};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::store::{MemberCounter, StepCounter, StepPlacement, WorkflowStore};
use crate::types::{
    Claim, MemberStatus, StepExecution, Workflow, WorkflowGoal, WorkflowMember, WorkflowStatus,
    WorkflowStep,
};

pub struct MemoryStore {
    workflows: DashMap<Uuid, Workflow>,
    steps: DashMap<Uuid, WorkflowStep>,
    /// workflow id -> step order -> step id
    step_orders: DashMap<Uuid, BTreeMap<u32, Uuid>>,
    goals: DashMap<Uuid, WorkflowGoal>,
    members: DashMap<Uuid, WorkflowMember>,
    /// (workflow id, customer id) -> active member ids in enrollment order
    active_members: DashMap<(Uuid, String), Vec<Uuid>>,
    executions: RwLock<Vec<StepExecution>>,
    available: AtomicBool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("workflows", &self.workflows.len())
            .field("steps", &self.steps.len())
            .field("members", &self.members.len())
            .field("executions", &self.executions.read().len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
            steps: DashMap::new(),
            step_orders: DashMap::new(),
            goals: DashMap::new(),
            members: DashMap::new(),
            active_members: DashMap::new(),
            executions: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every call fails with
    /// `StorageUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> AutomationResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AutomationError::StorageUnavailable(
                "in-memory store switched off".to_string(),
            ))
        }
    }

    fn with_claimed_member<T>(
        &self,
        member_id: Uuid,
        token: Uuid,
        f: impl FnOnce(&mut WorkflowMember) -> T,
    ) -> AutomationResult<T> {
        let mut member = self
            .members
            .get_mut(&member_id)
            .ok_or(AutomationError::UnknownMember(member_id))?;
        if !member.is_active() || member.claim_token() != Some(token) {
            return Err(AutomationError::ClaimLost(member_id));
        }
        Ok(f(member.value_mut()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert_workflow(&self, workflow: Workflow) -> AutomationResult<()> {
        self.ensure_available()?;
        self.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> AutomationResult<Option<Workflow>> {
        self.ensure_available()?;
        Ok(self.workflows.get(&id).map(|w| w.clone()))
    }

    async fn list_workflows(&self, tenant_id: &str) -> AutomationResult<Vec<Workflow>> {
        self.ensure_available()?;
        let mut workflows: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|w| w.tenant_id == tenant_id)
            .map(|w| w.value().clone())
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    async fn set_workflow_status(
        &self,
        id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        at: DateTime<Utc>,
    ) -> AutomationResult<Workflow> {
        self.ensure_available()?;
        let mut workflow = self
            .workflows
            .get_mut(&id)
            .ok_or(AutomationError::WorkflowNotFound(id))?;
        if workflow.status != from {
            return Err(AutomationError::InvalidTransition {
                from: workflow.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        workflow.status = to;
        workflow.updated_at = at;
        if to == WorkflowStatus::Active && workflow.activated_at.is_none() {
            workflow.activated_at = Some(at);
        }
        Ok(workflow.clone())
    }

    async fn insert_step(&self, step: WorkflowStep) -> AutomationResult<()> {
        self.ensure_available()?;
        if !self.workflows.contains_key(&step.workflow_id) {
            return Err(AutomationError::WorkflowNotFound(step.workflow_id));
        }
        {
            let mut orders = self.step_orders.entry(step.workflow_id).or_default();
            if orders.contains_key(&step.step_order) {
                return Err(AutomationError::InvalidStep(format!(
                    "step order {} is already used in workflow {}",
                    step.step_order, step.workflow_id
                )));
            }
            orders.insert(step.step_order, step.id);
        }
        self.steps.insert(step.id, step);
        Ok(())
    }

    async fn get_step(&self, id: Uuid) -> AutomationResult<Option<WorkflowStep>> {
        self.ensure_available()?;
        Ok(self.steps.get(&id).map(|s| s.clone()))
    }

    async fn steps_for_workflow(&self, workflow_id: Uuid) -> AutomationResult<Vec<WorkflowStep>> {
        self.ensure_available()?;
        let ids: Vec<Uuid> = self
            .step_orders
            .get(&workflow_id)
            .map(|orders| orders.values().copied().collect())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.steps.get(id).map(|s| s.clone()))
            .collect())
    }

    async fn next_step_after(
        &self,
        workflow_id: Uuid,
        step_order: u32,
    ) -> AutomationResult<Option<WorkflowStep>> {
        self.ensure_available()?;
        let next_id = self.step_orders.get(&workflow_id).and_then(|orders| {
            orders
                .range((Bound::Excluded(step_order), Bound::Unbounded))
                .next()
                .map(|(_, id)| *id)
        });
        Ok(next_id.and_then(|id| self.steps.get(&id).map(|s| s.clone())))
    }

    async fn increment_step_counter(
        &self,
        step_id: Uuid,
        counter: StepCounter,
    ) -> AutomationResult<()> {
        self.ensure_available()?;
        let mut step = self
            .steps
            .get_mut(&step_id)
            .ok_or(AutomationError::StepNotFound(step_id))?;
        match counter {
            StepCounter::Sent => step.counters.total_sent += 1,
            StepCounter::Delivered => step.counters.total_delivered += 1,
        }
        Ok(())
    }

    async fn insert_goal(&self, goal: WorkflowGoal) -> AutomationResult<()> {
        self.ensure_available()?;
        if !self.workflows.contains_key(&goal.workflow_id) {
            return Err(AutomationError::WorkflowNotFound(goal.workflow_id));
        }
        self.goals.insert(goal.id, goal);
        Ok(())
    }

    async fn get_goal(&self, id: Uuid) -> AutomationResult<Option<WorkflowGoal>> {
        self.ensure_available()?;
        Ok(self.goals.get(&id).map(|g| g.clone()))
    }

    async fn goals_for_workflow(&self, workflow_id: Uuid) -> AutomationResult<Vec<WorkflowGoal>> {
        self.ensure_available()?;
        let mut goals: Vec<WorkflowGoal> = self
            .goals
            .iter()
            .filter(|g| g.workflow_id == workflow_id)
            .map(|g| g.value().clone())
            .collect();
        goals.sort_by_key(|g| g.created_at);
        Ok(goals)
    }

    async fn increment_goal_achieved(&self, goal_id: Uuid) -> AutomationResult<()> {
        self.ensure_available()?;
        let mut goal = self
            .goals
            .get_mut(&goal_id)
            .ok_or(AutomationError::GoalNotFound(goal_id))?;
        goal.total_achieved += 1;
        Ok(())
    }

    async fn insert_member(&self, member: WorkflowMember, exclusive: bool) -> AutomationResult<()> {
        self.ensure_available()?;
        let key = (member.workflow_id, member.customer_id.clone());
        let mut active = self.active_members.entry(key).or_default();
        if exclusive && !active.is_empty() {
            return Err(AutomationError::AlreadyEnrolled {
                workflow_id: member.workflow_id,
                customer_id: member.customer_id,
            });
        }
        {
            let mut workflow = self
                .workflows
                .get_mut(&member.workflow_id)
                .ok_or(AutomationError::WorkflowNotFound(member.workflow_id))?;
            workflow.counters.total_entries += 1;
            workflow.counters.active_members += 1;
        }
        active.push(member.id);
        self.members.insert(member.id, member);
        Ok(())
    }

    async fn get_member(&self, id: Uuid) -> AutomationResult<Option<WorkflowMember>> {
        self.ensure_available()?;
        Ok(self.members.get(&id).map(|m| m.clone()))
    }

    async fn find_active_member(
        &self,
        workflow_id: Uuid,
        customer_id: &str,
    ) -> AutomationResult<Option<WorkflowMember>> {
        self.ensure_available()?;
        let latest = self
            .active_members
            .get(&(workflow_id, customer_id.to_string()))
            .and_then(|ids| ids.last().copied());
        Ok(latest
            .and_then(|id| self.members.get(&id).map(|m| m.clone()))
            .filter(WorkflowMember::is_active))
    }

    async fn members_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> AutomationResult<Vec<WorkflowMember>> {
        self.ensure_available()?;
        let mut members: Vec<WorkflowMember> = self
            .members
            .iter()
            .filter(|m| m.workflow_id == workflow_id)
            .map(|m| m.value().clone())
            .collect();
        members.sort_by_key(|m| m.entered_at);
        Ok(members)
    }

    async fn claim_due_members(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> AutomationResult<Vec<WorkflowMember>> {
        self.ensure_available()?;
        let expires_at = now.checked_add_signed(lease).ok_or_else(|| {
            AutomationError::InvalidConfiguration(format!("lease of {lease} is out of range"))
        })?;
        let running: HashSet<Uuid> = self
            .workflows
            .iter()
            .filter(|w| w.status == WorkflowStatus::Active)
            .map(|w| w.id)
            .collect();

        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = self
            .members
            .iter()
            .filter(|m| running.contains(&m.workflow_id) && m.is_claimable(now))
            .map(|m| (m.next_action_at, m.id))
            .collect();
        candidates.sort();

        let mut claimed = Vec::new();
        for (_, id) in candidates {
            if claimed.len() >= limit {
                break;
            }
            let Some(mut member) = self.members.get_mut(&id) else {
                continue;
            };
            // Re-checked under the entry lock; a concurrent tick may have won.
            if !member.is_claimable(now) {
                continue;
            }
            member.is_waiting = false;
            member.claim = Some(Claim {
                token: Uuid::new_v4(),
                owner: owner.to_string(),
                expires_at,
            });
            claimed.push(member.clone());
        }
        Ok(claimed)
    }

    async fn release_claim(
        &self,
        member_id: Uuid,
        token: Uuid,
        failed: bool,
    ) -> AutomationResult<WorkflowMember> {
        self.ensure_available()?;
        self.with_claimed_member(member_id, token, |member| {
            member.claim = None;
            member.is_waiting = true;
            if failed {
                member.consecutive_failures += 1;
            }
            member.clone()
        })
    }

    async fn move_member(
        &self,
        member_id: Uuid,
        token: Uuid,
        placement: StepPlacement,
    ) -> AutomationResult<WorkflowMember> {
        self.ensure_available()?;
        self.with_claimed_member(member_id, token, |member| {
            member.current_step_id = placement.step_id;
            member.current_step_entered_at = placement.entered_at;
            member.next_action_at = placement.next_action_at;
            member.counters.steps_completed += 1;
            member.consecutive_failures = 0;
            member.claim = None;
            member.is_waiting = true;
            member.clone()
        })
    }

    async fn finish_member(
        &self,
        member_id: Uuid,
        token: Option<Uuid>,
        status: MemberStatus,
        at: DateTime<Utc>,
    ) -> AutomationResult<WorkflowMember> {
        self.ensure_available()?;
        let finished = {
            let mut member = self
                .members
                .get_mut(&member_id)
                .ok_or(AutomationError::UnknownMember(member_id))?;
            if let Some(token) = token {
                if member.claim_token() != Some(token) {
                    return Err(AutomationError::ClaimLost(member_id));
                }
            }
            if !member.is_active() || status == MemberStatus::Active {
                return Err(AutomationError::InvalidTransition {
                    from: member.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            member.status = status;
            member.is_waiting = false;
            member.claim = None;
            match status {
                MemberStatus::Completed => member.completed_at = Some(at),
                MemberStatus::Cancelled => member.cancelled_at = Some(at),
                MemberStatus::Active => {}
            }
            member.clone()
        };

        if let Some(mut ids) = self
            .active_members
            .get_mut(&(finished.workflow_id, finished.customer_id.clone()))
        {
            ids.retain(|id| *id != member_id);
        }
        if let Some(mut workflow) = self.workflows.get_mut(&finished.workflow_id) {
            workflow.counters.active_members = workflow.counters.active_members.saturating_sub(1);
            if status == MemberStatus::Completed {
                workflow.counters.completed_members += 1;
            }
        }
        Ok(finished)
    }

    async fn increment_member_counter(
        &self,
        member_id: Uuid,
        counter: MemberCounter,
    ) -> AutomationResult<()> {
        self.ensure_available()?;
        let mut member = self
            .members
            .get_mut(&member_id)
            .ok_or(AutomationError::UnknownMember(member_id))?;
        match counter {
            MemberCounter::EmailsSent => member.counters.emails_sent += 1,
            MemberCounter::SmsSent => member.counters.sms_sent += 1,
        }
        Ok(())
    }

    async fn record_conversion(
        &self,
        member_id: Uuid,
        value: f64,
        at: DateTime<Utc>,
    ) -> AutomationResult<WorkflowMember> {
        self.ensure_available()?;
        let converted = {
            let mut member = self
                .members
                .get_mut(&member_id)
                .ok_or(AutomationError::UnknownMember(member_id))?;
            member.converted = true;
            member.converted_at = Some(at);
            member.conversion_value = Some(value);
            member.clone()
        };
        if let Some(mut workflow) = self.workflows.get_mut(&converted.workflow_id) {
            workflow.counters.total_conversions += 1;
            workflow.counters.total_revenue += value;
        }
        Ok(converted)
    }

    async fn append_execution(&self, execution: StepExecution) -> AutomationResult<()> {
        self.ensure_available()?;
        self.executions.write().push(execution);
        Ok(())
    }

    async fn executions_for_member(
        &self,
        member_id: Uuid,
    ) -> AutomationResult<Vec<StepExecution>> {
        self.ensure_available()?;
        Ok(self
            .executions
            .read()
            .iter()
            .filter(|e| e.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn executions_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> AutomationResult<Vec<StepExecution>> {
        self.ensure_available()?;
        Ok(self
            .executions
            .read()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Delay, MemberCounters, StepAction, StepCounters, TriggerKind, WorkflowCounters,
    };

    fn workflow(status: WorkflowStatus) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::new_v4(),
            tenant_id: "tenant-1".into(),
            name: "Welcome".into(),
            description: None,
            workflow_kind: "welcome_series".into(),
            trigger_kind: TriggerKind::Manual,
            trigger_config: serde_json::Value::Null,
            entry_criteria: serde_json::Value::Null,
            can_re_enter: false,
            send_time_optimization: false,
            sender: None,
            status,
            counters: WorkflowCounters::default(),
            created_at: now,
            updated_at: now,
            activated_at: None,
        }
    }

    fn step(workflow_id: Uuid, order: u32) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id,
            name: format!("step {order}"),
            step_order: order,
            delay: Delay::NONE,
            send_time: None,
            action: StepAction::Wait,
            counters: StepCounters::default(),
            created_at: Utc::now(),
        }
    }

    fn member(workflow_id: Uuid, customer: &str, due: DateTime<Utc>) -> WorkflowMember {
        WorkflowMember {
            id: Uuid::new_v4(),
            workflow_id,
            customer_id: customer.into(),
            tenant_id: "tenant-1".into(),
            entry_trigger: "manual".into(),
            status: MemberStatus::Active,
            current_step_id: Uuid::new_v4(),
            current_step_entered_at: due,
            next_action_at: due,
            is_waiting: true,
            claim: None,
            counters: MemberCounters::default(),
            consecutive_failures: 0,
            converted: false,
            converted_at: None,
            conversion_value: None,
            entered_at: due,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn test_step_order_is_unique_and_sorted() {
        let store = MemoryStore::new();
        let wf = workflow(WorkflowStatus::Draft);
        let wf_id = wf.id;
        store.insert_workflow(wf).await.unwrap();

        store.insert_step(step(wf_id, 20)).await.unwrap();
        store.insert_step(step(wf_id, 10)).await.unwrap();
        let dup = store.insert_step(step(wf_id, 10)).await.unwrap_err();
        assert!(matches!(dup, AutomationError::InvalidStep(_)));

        let orders: Vec<u32> = store
            .steps_for_workflow(wf_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.step_order)
            .collect();
        assert_eq!(orders, vec![10, 20]);

        let next = store.next_step_after(wf_id, 10).await.unwrap().unwrap();
        assert_eq!(next.step_order, 20);
        assert!(store.next_step_after(wf_id, 20).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exclusive_insert_and_counters() {
        let store = MemoryStore::new();
        let wf = workflow(WorkflowStatus::Active);
        let wf_id = wf.id;
        store.insert_workflow(wf).await.unwrap();

        let now = Utc::now();
        store.insert_member(member(wf_id, "c-1", now), true).await.unwrap();
        let err = store
            .insert_member(member(wf_id, "c-1", now), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::AlreadyEnrolled { .. }));
        store.insert_member(member(wf_id, "c-1", now), false).await.unwrap();

        let counters = store.get_workflow(wf_id).await.unwrap().unwrap().counters;
        assert_eq!(counters.total_entries, 2);
        assert_eq!(counters.active_members, 2);
    }

    #[tokio::test]
    async fn test_claim_orders_by_due_time_and_skips_claimed() {
        let store = MemoryStore::new();
        let wf = workflow(WorkflowStatus::Active);
        let wf_id = wf.id;
        store.insert_workflow(wf).await.unwrap();

        let now = Utc::now();
        let late = member(wf_id, "late", now - Duration::minutes(1));
        let early = member(wf_id, "early", now - Duration::minutes(10));
        let future = member(wf_id, "future", now + Duration::minutes(10));
        for m in [late.clone(), early.clone(), future] {
            store.insert_member(m, true).await.unwrap();
        }

        let first = store
            .claim_due_members(now, 1, "worker-a", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, early.id);
        assert!(!first[0].is_waiting);

        let second = store
            .claim_due_members(now, 10, "worker-b", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, late.id);

        // Lease expiry makes both reclaimable.
        let later = now + Duration::minutes(6);
        let reclaimed = store
            .claim_due_members(later, 10, "worker-c", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 2);
    }

    #[tokio::test]
    async fn test_paused_workflow_members_are_not_claimed() {
        let store = MemoryStore::new();
        let wf = workflow(WorkflowStatus::Paused);
        let wf_id = wf.id;
        store.insert_workflow(wf).await.unwrap();
        let now = Utc::now();
        store.insert_member(member(wf_id, "c-1", now), true).await.unwrap();

        let claimed = store
            .claim_due_members(now, 10, "worker-a", Duration::minutes(5))
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_release_and_finish_require_token() {
        let store = MemoryStore::new();
        let wf = workflow(WorkflowStatus::Active);
        let wf_id = wf.id;
        store.insert_workflow(wf).await.unwrap();
        let now = Utc::now();
        let m = member(wf_id, "c-1", now);
        let member_id = m.id;
        store.insert_member(m, true).await.unwrap();

        let claimed = store
            .claim_due_members(now, 1, "worker-a", Duration::minutes(5))
            .await
            .unwrap();
        let token = claimed[0].claim_token().unwrap();

        let err = store
            .release_claim(member_id, Uuid::new_v4(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ClaimLost(_)));

        let released = store.release_claim(member_id, token, true).await.unwrap();
        assert!(released.is_waiting);
        assert_eq!(released.consecutive_failures, 1);
        assert_eq!(released.next_action_at, now);

        let finished = store
            .finish_member(member_id, None, MemberStatus::Completed, now)
            .await
            .unwrap();
        assert_eq!(finished.status, MemberStatus::Completed);
        assert!(store.find_active_member(wf_id, "c-1").await.unwrap().is_none());

        let counters = store.get_workflow(wf_id).await.unwrap().unwrap().counters;
        assert_eq!(counters.active_members, 0);
        assert_eq!(counters.completed_members, 1);

        let again = store
            .finish_member(member_id, None, MemberStatus::Cancelled, now)
            .await
            .unwrap_err();
        assert!(matches!(again, AutomationError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_lease_past_date_range_is_rejected() {
        let store = MemoryStore::new();
        let wf = workflow(WorkflowStatus::Active);
        let wf_id = wf.id;
        store.insert_workflow(wf).await.unwrap();
        let now = Utc::now();
        let m = member(wf_id, "c-1", now);
        let member_id = m.id;
        store.insert_member(m, true).await.unwrap();

        let err = store
            .claim_due_members(now, 10, "worker-a", Duration::days(400_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::InvalidConfiguration(_)));
        let stored = store.get_member(member_id).await.unwrap().unwrap();
        assert!(stored.claim.is_none());
        assert!(stored.is_waiting);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store
            .claim_due_members(Utc::now(), 10, "worker-a", Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        store.set_available(true);
        assert!(store.list_workflows("tenant-1").await.unwrap().is_empty());
    }
}
