//! Customer lookup used for personalization and condition evaluation.

use async_trait::async_trait;
use automation_core::types::Customer;
use automation_core::AutomationResult;
use dashmap::DashMap;

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Returns `Ok(None)` when the customer does not exist.
    async fn get_customer(&self, customer_id: &str) -> AutomationResult<Option<Customer>>;
}

/// Customer records held in memory, keyed by customer id.
#[derive(Default)]
pub struct InMemoryCustomerDirectory {
    customers: DashMap<String, Customer>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, customer: Customer) {
        self.customers.insert(customer.id.clone(), customer);
    }

    pub fn remove(&self, customer_id: &str) -> Option<Customer> {
        self.customers.remove(customer_id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn get_customer(&self, customer_id: &str) -> AutomationResult<Option<Customer>> {
        Ok(self.customers.get(customer_id).map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let directory = InMemoryCustomerDirectory::new();
        directory.upsert(Customer::new("c-1").with_email("a@example.com"));
        directory.upsert(Customer::new("c-1").with_email("b@example.com"));

        assert_eq!(directory.len(), 1);
        let found = directory.get_customer("c-1").await.unwrap().unwrap();
        assert_eq!(found.email.as_deref(), Some("b@example.com"));
        assert!(directory.get_customer("missing").await.unwrap().is_none());

        directory.remove("c-1");
        assert!(directory.is_empty());
    }
}
