use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer record as returned by the customer directory. Only the contact
/// fields are typed; everything else lives in `attributes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Customer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, first: &str, last: &str) -> Self {
        self.first_name = Some(first.to_string());
        self.last_name = Some(last.to_string());
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Email address, treating a blank value as absent.
    pub fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    /// Phone number, treating a blank value as absent.
    pub fn contact_phone(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }

    /// Looks up a named field, checking the typed contact fields before the
    /// free-form attributes.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        let typed = match name {
            "id" => Some(&self.id),
            "first_name" => self.first_name.as_ref(),
            "last_name" => self.last_name.as_ref(),
            "email" => self.email.as_ref(),
            "phone" => self.phone.as_ref(),
            _ => return self.attributes.get(name).cloned(),
        };
        typed.map(|v| serde_json::Value::String(v.clone()))
    }

    /// Flat JSON snapshot of the record, used in webhook payloads.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.clone());
        }
        map.insert("id".into(), self.id.clone().into());
        map.insert("first_name".into(), self.first_name.clone().into());
        map.insert("last_name".into(), self.last_name.clone().into());
        map.insert("email".into(), self.email.clone().into());
        map.insert("phone".into(), self.phone.clone().into());
        serde_json::Value::Object(map)
    }
}

/// Identifies which workflow execution produced an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub workflow_id: Uuid,
    pub customer_id: String,
    pub member_id: Uuid,
    pub step_id: Uuid,
}

/// Domain event emitted by the engine for downstream analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub workflow_id: Uuid,
    pub member_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub step_id: Option<Uuid>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MemberEnrolled,
    StepExecuted,
    StepFailed,
    MemberCompleted,
    MemberCancelled,
    GoalAchieved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_handles_missing_parts() {
        let c = Customer::new("c-1").with_name("Ada", "Lovelace");
        assert_eq!(c.full_name(), "Ada Lovelace");

        let mut partial = Customer::new("c-2");
        partial.first_name = Some("Ada".into());
        assert_eq!(partial.full_name(), "Ada");
        assert_eq!(Customer::new("c-3").full_name(), "");
    }

    #[test]
    fn test_blank_contact_is_absent() {
        let c = Customer::new("c-1").with_email("  ").with_phone("+15551234");
        assert!(c.contact_email().is_none());
        assert_eq!(c.contact_phone(), Some("+15551234"));
    }

    #[test]
    fn test_field_lookup() {
        let c = Customer::new("c-1")
            .with_email("a@example.com")
            .with_attribute("total_purchases", serde_json::json!(10));
        assert_eq!(c.field("email"), Some(serde_json::json!("a@example.com")));
        assert_eq!(c.field("total_purchases"), Some(serde_json::json!(10)));
        assert_eq!(c.field("phone"), None);
        assert_eq!(c.field("unknown"), None);

        let snap = c.snapshot();
        assert_eq!(snap["id"], "c-1");
        assert_eq!(snap["total_purchases"], 10);
        assert!(snap["phone"].is_null());
    }
}
