//! Shared building blocks for the marketing automation engine: customer and
//! event types, the error taxonomy, configuration and the event bus.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{AutomationError, AutomationResult};
