use crate::types::{
    ExecutionStatus, MemberStatus, StepExecution, StepPerformance, Workflow, WorkflowGoal,
    WorkflowMember, WorkflowPerformance, WorkflowStep,
};

/// Aggregates a workflow's members, steps and execution log into one
/// report. Conversions count distinct converted members; revenue sums
/// their last recorded conversion values.
pub fn summarize(
    workflow: &Workflow,
    steps: &[WorkflowStep],
    members: &[WorkflowMember],
    executions: &[StepExecution],
    goals: Vec<WorkflowGoal>,
) -> WorkflowPerformance {
    let count = |status: MemberStatus| members.iter().filter(|m| m.status == status).count() as u64;
    let total_members = members.len() as u64;
    let conversions = members.iter().filter(|m| m.converted).count() as u64;
    let revenue: f64 = members.iter().filter_map(|m| m.conversion_value).sum();

    let steps = steps
        .iter()
        .map(|step| {
            let (succeeded, failed) = executions
                .iter()
                .filter(|e| e.step_id == step.id)
                .fold((0u64, 0u64), |(ok, err), e| match e.status {
                    ExecutionStatus::Success => (ok + 1, err),
                    ExecutionStatus::Failed => (ok, err + 1),
                });
            StepPerformance {
                step_id: step.id,
                name: step.name.clone(),
                step_order: step.step_order,
                kind: step.action.kind(),
                total_sent: step.counters.total_sent,
                total_delivered: step.counters.total_delivered,
                executions_succeeded: succeeded,
                executions_failed: failed,
            }
        })
        .collect();

    WorkflowPerformance {
        workflow_id: workflow.id,
        name: workflow.name.clone(),
        status: workflow.status,
        send_time_optimization: workflow.send_time_optimization,
        counters: workflow.counters.clone(),
        total_members,
        active: count(MemberStatus::Active),
        completed: count(MemberStatus::Completed),
        cancelled: count(MemberStatus::Cancelled),
        conversions,
        revenue,
        conversion_rate: conversion_rate(conversions, total_members),
        steps,
        goals,
    }
}

/// Percentage rounded to two decimals; zero without members.
pub fn conversion_rate(conversions: u64, total_members: u64) -> f64 {
    if total_members == 0 {
        return 0.0;
    }
    let pct = conversions as f64 / total_members as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_rate_rounding() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(1, 3), 33.33);
        assert_eq!(conversion_rate(2, 3), 66.67);
        assert_eq!(conversion_rate(5, 5), 100.0);
    }
}
