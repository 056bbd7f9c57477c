use automation_core::types::Customer;
use tracing::debug;
use uuid::Uuid;

use crate::types::{ComparisonOperator, ConditionAction, ConditionRule};

/// Evaluates condition steps against live customer records.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Compares one customer field against the rule's value.
    ///
    /// Numbers (or numeric strings) compare numerically. Otherwise `equals`
    /// compares the textual forms and the ordered operators are false. A
    /// missing field satisfies nothing.
    pub fn evaluate(&self, rule: &ConditionRule, customer: &Customer) -> bool {
        let Some(actual) = customer.field(&rule.field) else {
            return false;
        };
        if actual.is_null() {
            return false;
        }

        let numeric = as_number(&actual).zip(as_number(&rule.value));
        match (rule.operator, numeric) {
            (ComparisonOperator::Equals, Some((a, b))) => a == b,
            (ComparisonOperator::Equals, None) => as_text(&actual) == as_text(&rule.value),
            (ComparisonOperator::GreaterThan, Some((a, b))) => a > b,
            (ComparisonOperator::LessThan, Some((a, b))) => a < b,
            (_, None) => false,
        }
    }

    /// Picks the true or false target of a condition step.
    pub fn resolve_branch(&self, condition: &ConditionAction, customer: &Customer) -> Option<Uuid> {
        let matched = self.evaluate(&condition.rule, customer);
        debug!(
            field = %condition.rule.field,
            operator = ?condition.rule.operator,
            matched,
            "Condition evaluated"
        );
        if matched {
            condition.true_next_step
        } else {
            condition.false_next_step
        }
    }
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitutes `{{first_name}}`, `{{last_name}}`, `{{email}}`, `{{phone}}`
/// and `{{full_name}}` with the customer's values. Absent values render as
/// an empty string; unknown placeholders are left untouched.
pub fn personalize(template: &str, customer: &Customer) -> String {
    let replacements = [
        ("{{first_name}}", customer.first_name.clone().unwrap_or_default()),
        ("{{last_name}}", customer.last_name.clone().unwrap_or_default()),
        ("{{email}}", customer.email.clone().unwrap_or_default()),
        ("{{phone}}", customer.phone.clone().unwrap_or_default()),
        ("{{full_name}}", customer.full_name()),
    ];
    replacements
        .iter()
        .fold(template.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(field: &str, operator: ComparisonOperator, value: serde_json::Value) -> ConditionRule {
        ConditionRule {
            field: field.to_string(),
            operator,
            value,
        }
    }

    fn buyer(purchases: serde_json::Value) -> Customer {
        Customer::new("c-1")
            .with_name("Ada", "Lovelace")
            .with_attribute("total_purchases", purchases)
            .with_attribute("loyalty_tier", json!("gold"))
    }

    #[test]
    fn test_numeric_comparisons() {
        let eval = ConditionEvaluator::new();
        let gt5 = rule("total_purchases", ComparisonOperator::GreaterThan, json!(5));
        assert!(eval.evaluate(&gt5, &buyer(json!(10))));
        assert!(!eval.evaluate(&gt5, &buyer(json!(2))));
        assert!(!eval.evaluate(&gt5, &buyer(json!(5))));

        let lt5 = rule("total_purchases", ComparisonOperator::LessThan, json!("5"));
        assert!(eval.evaluate(&lt5, &buyer(json!("2"))));

        let eq = rule("total_purchases", ComparisonOperator::Equals, json!(10));
        assert!(eval.evaluate(&eq, &buyer(json!("10.0"))));
    }

    #[test]
    fn test_text_comparisons() {
        let eval = ConditionEvaluator::new();
        let gold = rule("loyalty_tier", ComparisonOperator::Equals, json!("gold"));
        assert!(eval.evaluate(&gold, &buyer(json!(1))));

        let ordered = rule("loyalty_tier", ComparisonOperator::GreaterThan, json!("bronze"));
        assert!(!eval.evaluate(&ordered, &buyer(json!(1))));

        let first = rule("first_name", ComparisonOperator::Equals, json!("Ada"));
        assert!(eval.evaluate(&first, &buyer(json!(1))));
    }

    #[test]
    fn test_missing_field_matches_nothing() {
        let eval = ConditionEvaluator::new();
        let customer = Customer::new("c-2");
        for op in [
            ComparisonOperator::Equals,
            ComparisonOperator::GreaterThan,
            ComparisonOperator::LessThan,
        ] {
            assert!(!eval.evaluate(&rule("total_purchases", op, json!(0)), &customer));
        }
    }

    #[test]
    fn test_resolve_branch() {
        let eval = ConditionEvaluator::new();
        let step_a = Uuid::new_v4();
        let condition = ConditionAction {
            rule: rule("total_purchases", ComparisonOperator::GreaterThan, json!(5)),
            true_next_step: Some(step_a),
            false_next_step: None,
        };
        assert_eq!(eval.resolve_branch(&condition, &buyer(json!(10))), Some(step_a));
        assert_eq!(eval.resolve_branch(&condition, &buyer(json!(2))), None);
    }

    #[test]
    fn test_personalize() {
        let customer = Customer::new("c-1")
            .with_name("Ada", "Lovelace")
            .with_email("ada@example.com");
        let rendered = personalize(
            "Hi {{first_name}} ({{full_name}}), we'll write to {{email}} or {{phone}}. {{coupon}}",
            &customer,
        );
        assert_eq!(
            rendered,
            "Hi Ada (Ada Lovelace), we'll write to ada@example.com or . {{coupon}}"
        );
    }
}
