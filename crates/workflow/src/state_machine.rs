use automation_core::{AutomationError, AutomationResult};
use serde::{Deserialize, Serialize};

use crate::types::WorkflowStatus;

/// Describes a single valid status change of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub trigger: String,
}

/// Guards the workflow lifecycle:
/// `draft -> active -> {paused <-> active} -> completed`.
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    transitions: Vec<StatusTransition>,
}

impl WorkflowStateMachine {
    pub fn new() -> Self {
        let edge = |from, to, trigger: &str| StatusTransition {
            from,
            to,
            trigger: trigger.to_string(),
        };
        let transitions = vec![
            edge(WorkflowStatus::Draft, WorkflowStatus::Active, "activate"),
            edge(WorkflowStatus::Active, WorkflowStatus::Paused, "pause"),
            edge(WorkflowStatus::Paused, WorkflowStatus::Active, "resume"),
            edge(WorkflowStatus::Active, WorkflowStatus::Completed, "complete"),
            edge(WorkflowStatus::Paused, WorkflowStatus::Completed, "complete"),
        ];
        Self { transitions }
    }

    /// Resolves the status `trigger` leads to from `from`.
    pub fn next(&self, from: WorkflowStatus, trigger: &str) -> AutomationResult<WorkflowStatus> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.trigger == trigger)
            .map(|t| t.to)
            .ok_or_else(|| AutomationError::InvalidTransition {
                from: from.as_str().to_string(),
                to: trigger.to_string(),
            })
    }
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
