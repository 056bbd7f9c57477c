use automation_core::AutomationResult;
use serde_json::json;
use tracing::info;

use crate::engine::AutomationEngine;
use crate::types::{
    ComparisonOperator, ConditionAction, ConditionRule, Delay, EmailAction, NewStep, NewWorkflow,
    SmsAction, StepAction, TriggerKind, WebhookAction, Workflow,
};

/// Creates and activates two sample workflows for `tenant_id`: a welcome
/// series and a win-back series that branches on purchase history.
pub async fn seed_demo_workflows(
    engine: &AutomationEngine,
    tenant_id: &str,
) -> AutomationResult<Vec<Workflow>> {
    info!(tenant_id, "Seeding demo workflows");

    // ---- 1. Welcome Series ----
    let mut welcome = NewWorkflow::new(tenant_id, "Welcome Series", "welcome_series");
    welcome.description = Some("Onboarding sequence for new customers".to_string());
    welcome.trigger_kind = TriggerKind::EventBased;
    welcome.trigger_config = json!({ "event": "customer_created" });
    let welcome = engine.create_workflow(welcome).await?;

    engine
        .add_step(
            welcome.id,
            NewStep::new(
                "Welcome email",
                1,
                StepAction::Email(EmailAction {
                    subject: "Welcome aboard, {{first_name}}!".to_string(),
                    body_template: "<h1>Hi {{full_name}}</h1><p>Thanks for joining us.</p>"
                        .to_string(),
                    template_id: Some("welcome".to_string()),
                }),
            ),
        )
        .await?;
    engine
        .add_step(
            welcome.id,
            NewStep::new("Give it a day", 2, StepAction::Wait).after(Delay::days(1)),
        )
        .await?;
    engine
        .add_step(
            welcome.id,
            NewStep::new(
                "Tips email",
                3,
                StepAction::Email(EmailAction {
                    subject: "{{first_name}}, three tips to get started".to_string(),
                    body_template: "<p>Here is how to make the most of your account.</p>"
                        .to_string(),
                    template_id: Some("tips".to_string()),
                }),
            )
            .at("09:00"),
        )
        .await?;
    engine
        .add_step(
            welcome.id,
            NewStep::new(
                "Notify CRM",
                4,
                StepAction::Webhook(WebhookAction {
                    url: Some("https://crm.example.com/hooks/onboarded".to_string()),
                    payload_shape: json!({ "stage": "onboarded" }),
                }),
            ),
        )
        .await?;
    engine.add_goal(welcome.id, "First purchase", "purchase").await?;
    let welcome = engine.activate_workflow(welcome.id).await?;

    // ---- 2. Win-back Series ----
    let mut win_back = NewWorkflow::new(tenant_id, "Win-back Series", "win_back").re_enterable();
    win_back.description = Some("Re-engage customers who stopped buying".to_string());
    let win_back = engine.create_workflow(win_back).await?;

    engine
        .add_step(
            win_back.id,
            NewStep::new(
                "We miss you",
                1,
                StepAction::Email(EmailAction {
                    subject: "We miss you, {{first_name}}".to_string(),
                    body_template: "<p>It has been a while. Come see what is new.</p>".to_string(),
                    template_id: None,
                }),
            ),
        )
        .await?;
    let discount = engine
        .add_step(
            win_back.id,
            NewStep::new(
                "Discount email",
                3,
                StepAction::Email(EmailAction {
                    subject: "10% off your next order".to_string(),
                    body_template: "<p>Use code COMEBACK10 at checkout.</p>".to_string(),
                    template_id: None,
                }),
            )
            .after(Delay::days(2)),
        )
        .await?;
    let vip_sms = engine
        .add_step(
            win_back.id,
            NewStep::new(
                "VIP text",
                4,
                StepAction::Sms(SmsAction {
                    message_template:
                        "{{first_name}}, your VIP offer is waiting. Reply STOP to opt out."
                            .to_string(),
                }),
            )
            .after(Delay::days(1))
            .at("10:00"),
        )
        .await?;
    engine
        .add_step(
            win_back.id,
            NewStep::new(
                "Loyal customer?",
                2,
                StepAction::Condition(ConditionAction {
                    rule: ConditionRule {
                        field: "total_purchases".to_string(),
                        operator: ComparisonOperator::GreaterThan,
                        value: json!(5),
                    },
                    true_next_step: Some(vip_sms.id),
                    false_next_step: Some(discount.id),
                }),
            )
            .after(Delay::days(3)),
        )
        .await?;
    engine.add_goal(win_back.id, "Repeat purchase", "purchase").await?;
    let win_back = engine.activate_workflow(win_back.id).await?;

    info!(count = 2, "Demo workflows seeded");
    Ok(vec![welcome, win_back])
}
