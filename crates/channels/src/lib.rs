//! Outbound collaborators of the automation engine.
//!
//! Customer lookup, email submission, SMS submission and webhook dispatch
//! are traits so deployments can plug in real providers; the in-memory
//! implementations here back the worker's demo mode and the test suites.

pub mod directory;
pub mod email;
pub mod sms;
pub mod webhook;

pub use directory::{CustomerDirectory, InMemoryCustomerDirectory};
pub use email::{EmailOutbox, EmailQueue, OutboundEmail};
pub use sms::{OutboundSms, SmsChannel, SmsOutbox};
pub use webhook::{HttpWebhookDispatcher, WebhookDispatcher, WebhookOutbox};
