//! Batch tick: claims due members and runs each one in isolation.
//!
//! One member failing never affects the others in the batch. Only a fatal
//! storage failure aborts the tick, and only after the members already
//! dispatched have finished.

use std::sync::Arc;

use automation_core::config::SchedulerConfig;
use automation_core::event_bus::{make_event, EventSink};
use automation_core::types::EventType;
use automation_core::{AutomationError, AutomationResult};
use chrono::Duration;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::advancer::Advancer;
use crate::executor::StepExecutor;
use crate::store::WorkflowStore;
use crate::timing::Clock;
use crate::types::{ExecutionStatus, StepExecution, StepKind, WorkflowMember, WorkflowStep};

/// Outcome of one `process_pending_actions` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Members claimed and dispatched, whether or not they succeeded.
    pub processed: usize,
    pub succeeded: usize,
    pub errors: Vec<MemberFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberFailure {
    pub member_id: Uuid,
    pub customer_id: String,
    pub step_id: Uuid,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn WorkflowStore>,
    executor: StepExecutor,
    advancer: Advancer,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    config: SchedulerConfig,
    node_id: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: StepExecutor,
        advancer: Advancer,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
        config: SchedulerConfig,
        node_id: &str,
    ) -> Self {
        Self {
            store,
            executor,
            advancer,
            clock,
            event_sink,
            config,
            node_id: node_id.to_string(),
        }
    }

    /// Claims up to `limit` due members, earliest first, and executes their
    /// current step on a bounded worker pool.
    pub async fn process_pending_actions(&self, limit: usize) -> AutomationResult<TickReport> {
        let now = self.clock.now();
        let lease = i64::try_from(self.config.lease_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                AutomationError::InvalidConfiguration(format!(
                    "lease_ttl_secs {} is out of range",
                    self.config.lease_ttl_secs
                ))
            })?;
        let claimed = self
            .store
            .claim_due_members(now, limit, &self.node_id, lease)
            .await?;

        let mut report = TickReport {
            processed: claimed.len(),
            ..TickReport::default()
        };
        if claimed.is_empty() {
            debug!("No due workflow members");
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for member in claimed {
            let scheduler = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                scheduler.run_isolated(member).await
            });
        }

        let mut fatal: Option<AutomationError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(None)) => report.succeeded += 1,
                Ok(Ok(Some(failure))) => report.errors.push(failure),
                Ok(Err(err)) => {
                    error!(error = %err, "Storage failure during tick");
                    fatal.get_or_insert(err);
                }
                Err(join_err) => error!(error = %join_err, "Member task panicked"),
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.errors.len(),
            "Workflow tick finished"
        );
        Ok(report)
    }

    /// Runs the member on its own task so a panic in a collaborator is
    /// recorded as a failure of this member and its claim is released.
    async fn run_isolated(
        &self,
        member: WorkflowMember,
    ) -> AutomationResult<Option<MemberFailure>> {
        let runner = self.clone();
        let claimed = member.clone();
        match tokio::spawn(async move { runner.run_member(claimed).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                error!(member_id = %member.id, error = %join_err, "Member task panicked");
                let kind = self
                    .store
                    .get_step(member.current_step_id)
                    .await?
                    .map(|s| s.action.kind());
                let err = AutomationError::TaskPanicked(join_err.to_string());
                self.handle_failure(&member, kind, err).await.map(Some)
            }
        }
    }

    /// Runs one claimed member. `Ok(Some(_))` is an isolated failure, `Err`
    /// only ever carries a fatal storage error.
    async fn run_member(&self, member: WorkflowMember) -> AutomationResult<Option<MemberFailure>> {
        let step = self.store.get_step(member.current_step_id).await?;
        let kind = step.as_ref().map(|s| s.action.kind());
        let attempt = match &step {
            Some(step) => self.attempt(&member, step).await,
            None => Err(AutomationError::StepNotFound(member.current_step_id)),
        };

        match attempt {
            Ok(()) => Ok(None),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => self.handle_failure(&member, kind, err).await.map(Some),
        }
    }

    async fn attempt(&self, member: &WorkflowMember, step: &WorkflowStep) -> AutomationResult<()> {
        let workflow = self
            .store
            .get_workflow(member.workflow_id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(member.workflow_id))?;

        let outcome = self.executor.execute(&workflow, step, member).await?;

        // The success record is written only once the member has moved on,
        // so a failed advance leaves a single failed execution behind.
        match self.advancer.advance(member, step, outcome).await {
            Ok(_) => {}
            Err(AutomationError::ClaimLost(id)) => {
                warn!(member_id = %id, "Claim lost before advancing; leaving member as is");
            }
            Err(err) => return Err(err),
        }

        let kind = step.action.kind();
        self.store
            .append_execution(self.execution(member, Some(kind), ExecutionStatus::Success, None))
            .await?;
        metrics::counter!("automation.steps_executed", "kind" => kind.as_str()).increment(1);
        let mut event = make_event(
            EventType::StepExecuted,
            member.workflow_id,
            Some(member.id),
            Some(member.customer_id.clone()),
        );
        event.step_id = Some(step.id);
        self.event_sink.emit(event);
        Ok(())
    }

    async fn handle_failure(
        &self,
        member: &WorkflowMember,
        kind: Option<StepKind>,
        err: AutomationError,
    ) -> AutomationResult<MemberFailure> {
        let kind_label = kind.map(|k| k.as_str()).unwrap_or("unknown");
        warn!(
            member_id = %member.id,
            step_id = %member.current_step_id,
            kind = kind_label,
            error = %err,
            "Workflow step failed"
        );
        metrics::counter!("automation.step_failures", "kind" => kind_label).increment(1);

        self.store
            .append_execution(self.execution(
                member,
                kind,
                ExecutionStatus::Failed,
                Some(err.to_string()),
            ))
            .await?;
        let mut event = make_event(
            EventType::StepFailed,
            member.workflow_id,
            Some(member.id),
            Some(member.customer_id.clone()),
        );
        event.step_id = Some(member.current_step_id);
        event.detail = Some(err.to_string());
        self.event_sink.emit(event);

        if let Some(token) = member.claim_token() {
            match self.store.release_claim(member.id, token, true).await {
                Ok(released) => self.apply_retry_cutoff(&released).await?,
                Err(AutomationError::ClaimLost(_)) => {
                    debug!(member_id = %member.id, "Claim already gone; nothing to release")
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(member_id = %member.id, error = %e, "Failed to release claim"),
            }
        }

        Ok(MemberFailure {
            member_id: member.id,
            customer_id: member.customer_id.clone(),
            step_id: member.current_step_id,
            kind: err.kind(),
            error: err.to_string(),
        })
    }

    async fn apply_retry_cutoff(&self, member: &WorkflowMember) -> AutomationResult<()> {
        let Some(max) = self.config.max_attempts else {
            return Ok(());
        };
        if member.consecutive_failures < max {
            return Ok(());
        }
        match self
            .advancer
            .cancel(member.id, "maximum consecutive failures reached")
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(member_id = %member.id, error = %e, "Could not cancel failing member");
                Ok(())
            }
        }
    }

    fn execution(
        &self,
        member: &WorkflowMember,
        step_kind: Option<StepKind>,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> StepExecution {
        StepExecution {
            id: Uuid::new_v4(),
            member_id: member.id,
            workflow_id: member.workflow_id,
            step_id: member.current_step_id,
            customer_id: member.customer_id.clone(),
            tenant_id: member.tenant_id.clone(),
            status,
            step_kind,
            error,
            executed_at: self.clock.now(),
        }
    }
}
