use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A journey definition: an ordered list of timed steps customers move
/// through once enrolled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Free-form tag such as `welcome_series` or `win_back`.
    pub workflow_kind: String,
    pub trigger_kind: TriggerKind,
    /// Interpreted by the enrollment caller, never by the engine.
    pub trigger_config: serde_json::Value,
    /// Evaluated by the caller before it enrolls anyone.
    pub entry_criteria: serde_json::Value,
    pub can_re_enter: bool,
    pub send_time_optimization: bool,
    pub sender: Option<SenderIdentity>,
    pub status: WorkflowStatus,
    pub counters: WorkflowCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
        }
    }
}

/// How customers enter a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    EventBased,
    Scheduled,
}

/// Sender shown on outgoing email, overriding the configured default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCounters {
    pub total_entries: u64,
    pub active_members: u64,
    pub completed_members: u64,
    pub total_conversions: u64,
    pub total_revenue: f64,
}

/// Authoring input for `create_workflow`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub workflow_kind: String,
    #[serde(default)]
    pub trigger_kind: TriggerKind,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub entry_criteria: serde_json::Value,
    #[serde(default)]
    pub can_re_enter: bool,
    #[serde(default)]
    pub send_time_optimization: bool,
    #[serde(default)]
    pub sender: Option<SenderIdentity>,
}

impl NewWorkflow {
    pub fn new(tenant_id: &str, name: &str, workflow_kind: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            workflow_kind: workflow_kind.to_string(),
            ..Default::default()
        }
    }

    pub fn re_enterable(mut self) -> Self {
        self.can_re_enter = true;
        self
    }
}

/// One action in a workflow's ordered sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    /// Unique within the workflow; defines the linear sequence.
    pub step_order: u32,
    /// Measured from the moment the member enters this step.
    pub delay: Delay,
    /// Overrides the clock time of the computed due date.
    pub send_time: Option<NaiveTime>,
    pub action: StepAction,
    pub counters: StepCounters,
    pub created_at: DateTime<Utc>,
}

/// Kind-specific payload of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepAction {
    Email(EmailAction),
    Sms(SmsAction),
    Wait,
    Condition(ConditionAction),
    Webhook(WebhookAction),
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Email(_) => StepKind::Email,
            StepAction::Sms(_) => StepKind::Sms,
            StepAction::Wait => StepKind::Wait,
            StepAction::Condition(_) => StepKind::Condition,
            StepAction::Webhook(_) => StepKind::Webhook,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Email,
    Sms,
    Wait,
    Condition,
    Webhook,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Email => "email",
            StepKind::Sms => "sms",
            StepKind::Wait => "wait",
            StepKind::Condition => "condition",
            StepKind::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAction {
    pub subject: String,
    pub body_template: String,
    #[serde(default)]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsAction {
    pub message_template: String,
}

/// A branch point. A `None` target means the member exits the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionAction {
    pub rule: ConditionRule,
    pub true_next_step: Option<Uuid>,
    pub false_next_step: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAction {
    /// Missing URLs are accepted at authoring time and fail at execution.
    pub url: Option<String>,
    /// Extra static data merged into the payload under `data`.
    #[serde(default)]
    pub payload_shape: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub amount: u32,
    pub unit: DelayUnit,
}

impl Delay {
    pub const NONE: Delay = Delay {
        amount: 0,
        unit: DelayUnit::Minutes,
    };

    pub fn minutes(amount: u32) -> Self {
        Self { amount, unit: DelayUnit::Minutes }
    }

    pub fn hours(amount: u32) -> Self {
        Self { amount, unit: DelayUnit::Hours }
    }

    pub fn days(amount: u32) -> Self {
        Self { amount, unit: DelayUnit::Days }
    }

    pub fn weeks(amount: u32) -> Self {
        Self { amount, unit: DelayUnit::Weeks }
    }

    /// `None` when the amount does not fit a `Duration`.
    pub fn to_duration(&self) -> Option<Duration> {
        let amount = i64::from(self.amount);
        match self.unit {
            DelayUnit::Minutes => Duration::try_minutes(amount),
            DelayUnit::Hours => Duration::try_hours(amount),
            DelayUnit::Days => Duration::try_days(amount),
            DelayUnit::Weeks => Duration::try_weeks(amount),
        }
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    pub total_sent: u64,
    pub total_delivered: u64,
}

/// Authoring input for `add_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub name: String,
    pub step_order: u32,
    #[serde(default)]
    pub delay: Delay,
    /// `HH:MM` or `HH:MM:SS`.
    #[serde(default)]
    pub send_time: Option<String>,
    pub action: StepAction,
}

impl NewStep {
    pub fn new(name: &str, step_order: u32, action: StepAction) -> Self {
        Self {
            name: name.to_string(),
            step_order,
            delay: Delay::NONE,
            send_time: None,
            action,
        }
    }

    pub fn after(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn at(mut self, send_time: &str) -> Self {
        self.send_time = Some(send_time.to_string());
        self
    }
}

/// One customer's enrollment in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMember {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub customer_id: String,
    pub tenant_id: String,
    pub entry_trigger: String,
    pub status: MemberStatus,
    pub current_step_id: Uuid,
    pub current_step_entered_at: DateTime<Utc>,
    /// Ignored by the scheduler once the member is no longer active.
    pub next_action_at: DateTime<Utc>,
    pub is_waiting: bool,
    pub claim: Option<Claim>,
    pub counters: MemberCounters,
    pub consecutive_failures: u32,
    pub converted: bool,
    pub converted_at: Option<DateTime<Utc>>,
    pub conversion_value: Option<f64>,
    pub entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl WorkflowMember {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Whether a tick running at `now` may claim this member: waiting and
    /// due, or held by a claim whose lease has run out.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active() || self.next_action_at > now {
            return false;
        }
        match &self.claim {
            None => self.is_waiting,
            Some(claim) => claim.expires_at <= now,
        }
    }

    pub fn claim_token(&self) -> Option<Uuid> {
        self.claim.as_ref().map(|c| c.token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Completed,
    Cancelled,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Completed => "completed",
            MemberStatus::Cancelled => "cancelled",
        }
    }
}

/// Exclusive lease a scheduler tick holds on a member while executing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: Uuid,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCounters {
    pub emails_sent: u64,
    pub sms_sent: u64,
    pub steps_completed: u64,
}

/// Immutable audit record of one attempt to run a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub member_id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: Uuid,
    pub customer_id: String,
    pub tenant_id: String,
    pub status: ExecutionStatus,
    /// `None` when the step definition could not be loaded.
    pub step_kind: Option<StepKind>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// A named conversion event members can be credited with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGoal {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub goal_kind: String,
    pub total_achieved: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate metrics for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPerformance {
    pub workflow_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub send_time_optimization: bool,
    pub counters: WorkflowCounters,
    pub total_members: u64,
    pub active: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub conversions: u64,
    pub revenue: f64,
    /// Percentage of members converted, rounded to two decimals.
    pub conversion_rate: f64,
    pub steps: Vec<StepPerformance>,
    pub goals: Vec<WorkflowGoal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPerformance {
    pub step_id: Uuid,
    pub name: String,
    pub step_order: u32,
    pub kind: StepKind,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_durations() {
        assert_eq!(Delay::minutes(30).to_duration(), Some(Duration::minutes(30)));
        assert_eq!(Delay::hours(2).to_duration(), Some(Duration::hours(2)));
        assert_eq!(Delay::days(2).to_duration(), Some(Duration::hours(48)));
        assert_eq!(Delay::weeks(1).to_duration(), Some(Duration::days(7)));
        assert_eq!(Delay::default().to_duration(), Some(Duration::zero()));
    }

    #[test]
    fn test_step_action_serde_tagging() {
        let action = StepAction::Condition(ConditionAction {
            rule: ConditionRule {
                field: "total_purchases".into(),
                operator: ComparisonOperator::GreaterThan,
                value: serde_json::json!(5),
            },
            true_next_step: None,
            false_next_step: None,
        });
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "condition");
        assert_eq!(json["rule"]["operator"], "greater_than");

        let wait: StepAction = serde_json::from_value(serde_json::json!({"kind": "wait"})).unwrap();
        assert_eq!(wait.kind(), StepKind::Wait);
    }

    #[test]
    fn test_claimable_rules() {
        let now = Utc::now();
        let mut member = WorkflowMember {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            customer_id: "c-1".into(),
            tenant_id: "t-1".into(),
            entry_trigger: "manual".into(),
            status: MemberStatus::Active,
            current_step_id: Uuid::new_v4(),
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
        assert!(member.is_claimable(now));
        assert!(!member.is_claimable(now - Duration::minutes(1)));

        member.is_waiting = false;
        member.claim = Some(Claim {
            token: Uuid::new_v4(),
            owner: "worker-01".into(),
            expires_at: now + Duration::minutes(5),
        });
        assert!(!member.is_claimable(now));
        assert!(member.is_claimable(now + Duration::minutes(5)));

        member.status = MemberStatus::Completed;
        assert!(!member.is_claimable(now + Duration::minutes(10)));
    }
}
