use thiserror::Error;
use uuid::Uuid;

pub type AutomationResult<T> = Result<T, AutomationError>;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("Workflow {0} is not active")]
    WorkflowNotActive(Uuid),

    #[error("Workflow {0} has no steps")]
    EmptyWorkflow(Uuid),

    #[error("Workflow {0} is not a draft; steps can no longer be edited")]
    WorkflowLocked(Uuid),

    #[error("Invalid workflow status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Step {0} not found")]
    StepNotFound(Uuid),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Goal {0} not found")]
    GoalNotFound(Uuid),

    #[error("Customer {customer_id} is already enrolled in workflow {workflow_id}")]
    AlreadyEnrolled {
        workflow_id: Uuid,
        customer_id: String,
    },

    #[error("No active member for customer {customer_id} in workflow {workflow_id}")]
    MemberNotFound {
        workflow_id: Uuid,
        customer_id: String,
    },

    #[error("Member {0} not found")]
    UnknownMember(Uuid),

    #[error("Customer {0} not found")]
    CustomerNotFound(String),

    #[error("Customer {customer_id} has no {field}")]
    MissingContactInfo {
        customer_id: String,
        field: &'static str,
    },

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{channel} channel timed out after {timeout_ms}ms")]
    ChannelTimeout {
        channel: &'static str,
        timeout_ms: u64,
    },

    #[error("{channel} channel rejected the message: {reason}")]
    ChannelRejected {
        channel: &'static str,
        reason: String,
    },

    #[error("Claim on member {0} is no longer held")]
    ClaimLost(Uuid),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Step execution panicked: {0}")]
    TaskPanicked(String),
}

impl AutomationError {
    /// Only a storage outage aborts a whole scheduler tick; everything else
    /// is isolated to the member that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AutomationError::StorageUnavailable(_))
    }

    /// Short machine-readable label, used for metrics and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::WorkflowNotFound(_) => "workflow_not_found",
            AutomationError::WorkflowNotActive(_) => "workflow_not_active",
            AutomationError::EmptyWorkflow(_) => "empty_workflow",
            AutomationError::WorkflowLocked(_) => "workflow_locked",
            AutomationError::InvalidTransition { .. } => "invalid_transition",
            AutomationError::StepNotFound(_) => "step_not_found",
            AutomationError::InvalidStep(_) => "invalid_step",
            AutomationError::GoalNotFound(_) => "goal_not_found",
            AutomationError::AlreadyEnrolled { .. } => "already_enrolled",
            AutomationError::MemberNotFound { .. } => "member_not_found",
            AutomationError::UnknownMember(_) => "unknown_member",
            AutomationError::CustomerNotFound(_) => "customer_not_found",
            AutomationError::MissingContactInfo { .. } => "missing_contact_info",
            AutomationError::MissingConfiguration(_) => "missing_configuration",
            AutomationError::InvalidConfiguration(_) => "invalid_configuration",
            AutomationError::ChannelTimeout { .. } => "channel_timeout",
            AutomationError::ChannelRejected { .. } => "channel_rejected",
            AutomationError::ClaimLost(_) => "claim_lost",
            AutomationError::StorageUnavailable(_) => "storage_unavailable",
            AutomationError::Config(_) => "config",
            AutomationError::TaskPanicked(_) => "task_panicked",
        }
    }
}
